//! Yes/no decisions injected into workflows.
//!
//! Destructive steps ask a [`UserPrompter`] instead of reading the terminal
//! directly, so callers can pre-answer or script the decision.

pub mod prompts;

pub use prompts::{is_affirmative, ConsolePrompter};

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait UserPrompter: Send + Sync {
    /// Ask a yes/no question. Anything but an affirmative answer is `false`.
    async fn prompt_yes_no(&self, message: &str) -> Result<bool>;
}

/// Asks `prompter` and treats a failure to get an answer as "no".
pub async fn confirm(prompter: &dyn UserPrompter, message: &str) -> bool {
    match prompter.prompt_yes_no(message).await {
        Ok(answer) => answer,
        Err(err) => {
            tracing::warn!("Could not read a confirmation, treating it as no: {:#}", err);
            false
        }
    }
}

/// Answers every question the same way without asking anyone.
#[derive(Debug, Clone, Copy)]
pub struct StaticAnswer(pub bool);

#[async_trait]
impl UserPrompter for StaticAnswer {
    async fn prompt_yes_no(&self, message: &str) -> Result<bool> {
        tracing::debug!("Answering {} to: {}", self.0, message.trim_end());
        Ok(self.0)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every question and replays scripted answers in order.
    /// Once the script runs out every further answer is `false`.
    #[derive(Clone, Default)]
    pub struct MockUserPrompter {
        answers: Arc<Mutex<Vec<bool>>>,
        questions: Arc<Mutex<Vec<String>>>,
    }

    impl MockUserPrompter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_answer(&self, answer: bool) {
            self.answers.lock().unwrap().push(answer);
        }

        pub fn questions(&self) -> Vec<String> {
            self.questions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UserPrompter for MockUserPrompter {
        async fn prompt_yes_no(&self, message: &str) -> Result<bool> {
            self.questions.lock().unwrap().push(message.to_string());
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                Ok(false)
            } else {
                Ok(answers.remove(0))
            }
        }
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{self, BufRead, Write};

use super::UserPrompter;

/// Only the exact tokens `y` and `yes` count as agreement. The line
/// terminator is ignored, nothing else is trimmed and case matters.
pub fn is_affirmative(input: &str) -> bool {
    let answer = input
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(input);
    matches!(answer, "y" | "yes")
}

/// Asks on stdout and reads the answer from stdin.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    pub fn new() -> Self {
        Self
    }

    fn read_answer(message: String) -> Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{message}")?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input)
    }
}

#[async_trait]
impl UserPrompter for ConsolePrompter {
    async fn prompt_yes_no(&self, message: &str) -> Result<bool> {
        let message = message.to_string();
        let input = tokio::task::spawn_blocking(move || Self::read_answer(message))
            .await
            .context("Prompt task panicked")??;
        Ok(is_affirmative(&input))
    }
}

use std::collections::HashMap;
use std::path::Path;

use crate::subprocess::ProcessCommand;

/// Builds a shell command line from a program and arguments, quoting each
/// argument so it survives `sh -c` intact.
///
/// Several programs can be chained with [`ProcessCommandBuilder::and_then`],
/// which joins them with `&&`.
pub struct ProcessCommandBuilder {
    segments: Vec<Vec<String>>,
    env: HashMap<String, String>,
    working_dir: Option<std::path::PathBuf>,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            segments: vec![vec![program.to_string()]],
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.current().push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.current()
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// `--name=value`
    pub fn flag(self, name: &str, value: impl std::fmt::Display) -> Self {
        self.arg(format!("--{name}={value}"))
    }

    pub fn arg_if(self, condition: bool, arg: &str) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }

    /// Starts a new program that runs only if the previous one succeeded.
    pub fn and_then(mut self, program: &str) -> Self {
        self.segments.push(vec![program.to_string()]);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn build(self) -> ProcessCommand {
        let script = self
            .segments
            .iter()
            .map(|segment| shell_words::join(segment))
            .collect::<Vec<_>>()
            .join(" && ");

        ProcessCommand {
            script,
            env: self.env,
            working_dir: self.working_dir,
        }
    }

    fn current(&mut self) -> &mut Vec<String> {
        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }
}

//! Agent command-line configuration.

use thiserror::Error;

/// Command parse error.
#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("command line cannot be parsed: {0}")]
    Invalid(String),
    #[error("command line is empty")]
    Empty,
}

/// How to invoke the external coding-agent CLI.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments always passed.
    pub args: Vec<String>,
    /// Flag used to resume an agent-issued session id.
    pub resume_flag: String,
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--input-format".to_string(),
                "stream-json".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            resume_flag: "--resume".to_string(),
        }
    }
}

impl AgentCommand {
    /// Create a command with no base arguments.
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            resume_flag: "--resume".to_string(),
        }
    }

    /// Parse a full command line, e.g. `"claude --output-format stream-json"`.
    ///
    /// # Errors
    /// Returns an error if the line cannot be tokenized or is empty.
    pub fn parse(line: &str) -> Result<Self, CommandParseError> {
        let mut parts =
            shlex::split(line).ok_or_else(|| CommandParseError::Invalid(line.to_string()))?;
        if parts.is_empty() {
            return Err(CommandParseError::Empty);
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
            resume_flag: "--resume".to_string(),
        })
    }

    /// Append arguments.
    #[must_use]
    pub fn with_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Full argument list for an invocation, optionally resuming an
    /// agent-issued session id.
    #[must_use]
    pub fn invocation_args(&self, resume_session: Option<&str>) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(id) = resume_session {
            args.push(self.resume_flag.clone());
            args.push(id.to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_command_lines() {
        let cmd = AgentCommand::parse("claude --append-system-prompt 'be terse'").unwrap();
        assert_eq!(cmd.program, "claude");
        assert_eq!(cmd.args, vec!["--append-system-prompt", "be terse"]);
    }

    #[test]
    fn rejects_empty_command_lines() {
        assert!(matches!(
            AgentCommand::parse(""),
            Err(CommandParseError::Empty)
        ));
    }

    #[test]
    fn resume_appends_flag_and_id() {
        let cmd = AgentCommand::new("claude").with_args(["--verbose"]);
        assert_eq!(
            cmd.invocation_args(Some("abc-123")),
            vec!["--verbose", "--resume", "abc-123"]
        );
        assert_eq!(cmd.invocation_args(None), vec!["--verbose"]);
    }
}

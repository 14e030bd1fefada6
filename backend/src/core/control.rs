//! Parsing of inbound frontend messages into a closed control-message type.
//!
//! Dispatch happens here, once, at the transport boundary. Everything that is
//! not a recognized control prefix is a natural-language prompt.

use std::path::PathBuf;

/// Requested verbosity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerboseArg {
    On,
    Off,
    /// Unrecognized value: report the current state.
    Query,
}

/// A shell command that failed in the frontend, with its captured output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashFailure {
    pub exit_code: i32,
    pub command: String,
    pub temp_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Status,
    Cwd(PathBuf),
    Verbose(VerboseArg),
    AiProvider(String),
    BashFailed(BashFailure),
    Undo,
    Prompt(String),
    /// A recognized prefix with an unusable payload.
    Malformed(String),
}

impl ControlMessage {
    /// Parse one request line (already stripped of its terminator).
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "STATUS" => return Self::Status,
            "UNDO" => return Self::Undo,
            _ => {}
        }

        if let Some(path) = line.strip_prefix("CWD:") {
            let path = path.trim();
            if path.is_empty() {
                return Self::Malformed("Missing working directory".to_string());
            }
            let path = PathBuf::from(path);
            if !path.is_absolute() {
                return Self::Malformed(format!(
                    "Working directory must be absolute: {}",
                    path.display()
                ));
            }
            return Self::Cwd(path);
        }
        if let Some(value) = line.strip_prefix("VERBOSE:") {
            let arg = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => VerboseArg::On,
                "0" | "false" | "off" => VerboseArg::Off,
                _ => VerboseArg::Query,
            };
            return Self::Verbose(arg);
        }
        if let Some(name) = line.strip_prefix("AI_PROVIDER:") {
            return Self::AiProvider(name.trim().to_string());
        }
        if let Some(rest) = line.strip_prefix("BASH_FAILED:") {
            return match parse_bash_failure(rest) {
                Some(failure) => Self::BashFailed(failure),
                None => Self::Malformed("Invalid bash failure context".to_string()),
            };
        }

        Self::Prompt(line.to_string())
    }
}

/// `<exit>:<command>:<temp>`; the command may itself contain `:`.
fn parse_bash_failure(rest: &str) -> Option<BashFailure> {
    let (exit, remainder) = rest.split_once(':')?;
    let (command, temp_path) = remainder.rsplit_once(':')?;
    let exit_code = exit.trim().parse().ok()?;
    if temp_path.trim().is_empty() {
        return None;
    }
    Some(BashFailure {
        exit_code,
        command: command.to_string(),
        temp_path: PathBuf::from(temp_path.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_control_messages() {
        assert_eq!(ControlMessage::parse("STATUS"), ControlMessage::Status);
        assert_eq!(ControlMessage::parse("UNDO\r"), ControlMessage::Undo);
        assert_eq!(
            ControlMessage::parse("CWD:/home/me/project"),
            ControlMessage::Cwd(PathBuf::from("/home/me/project"))
        );
        assert_eq!(
            ControlMessage::parse("AI_PROVIDER: openrouter"),
            ControlMessage::AiProvider("openrouter".to_string())
        );
    }

    #[test]
    fn relative_working_directory_is_malformed() {
        assert_eq!(
            ControlMessage::parse("CWD:project/src"),
            ControlMessage::Malformed("Working directory must be absolute: project/src".to_string())
        );
        assert!(matches!(ControlMessage::parse("CWD:~/code"), ControlMessage::Malformed(_)));
        assert!(matches!(ControlMessage::parse("CWD:  "), ControlMessage::Malformed(_)));
    }

    #[test]
    fn verbose_values_map_to_on_off_or_query() {
        assert_eq!(
            ControlMessage::parse("VERBOSE:on"),
            ControlMessage::Verbose(VerboseArg::On)
        );
        assert_eq!(
            ControlMessage::parse("VERBOSE:0"),
            ControlMessage::Verbose(VerboseArg::Off)
        );
        assert_eq!(
            ControlMessage::parse("VERBOSE:maybe"),
            ControlMessage::Verbose(VerboseArg::Query)
        );
    }

    #[test]
    fn bash_failure_command_may_contain_colons() {
        let parsed = ControlMessage::parse("BASH_FAILED:127:echo a:b:/tmp/out.txt");
        assert_eq!(
            parsed,
            ControlMessage::BashFailed(BashFailure {
                exit_code: 127,
                command: "echo a:b".to_string(),
                temp_path: PathBuf::from("/tmp/out.txt"),
            })
        );
    }

    #[test]
    fn bash_failure_with_bad_exit_code_is_malformed() {
        assert!(matches!(
            ControlMessage::parse("BASH_FAILED:x:ls:/tmp/out"),
            ControlMessage::Malformed(_)
        ));
        assert!(matches!(
            ControlMessage::parse("BASH_FAILED:1:ls"),
            ControlMessage::Malformed(_)
        ));
    }

    #[test]
    fn anything_else_is_a_prompt() {
        assert_eq!(
            ControlMessage::parse("show me the largest files"),
            ControlMessage::Prompt("show me the largest files".to_string())
        );
        assert_eq!(
            ControlMessage::parse("status of nginx"),
            ControlMessage::Prompt("status of nginx".to_string())
        );
    }
}

use crate::error::Result;
use crate::error::SandboxError;

/// Shell metacharacters the validator refuses to let through unescaped, per
/// §4.2. `shlex` has already stripped legitimate quoting by the time these
/// are checked, so a bare survivor means a metacharacter genuinely.
const BANNED_METACHARACTERS: [char; 8] = ['|', '&', ';', '>', '<', '$', '(', ')'];

/// Fragments that are banned outright regardless of quoting, matched as
/// case-sensitive substrings of the raw command text.
const BANNED_FRAGMENTS: [&str; 5] = ["rm -rf /", "mkfs", "dd", "format", "--no-preserve-root"];

#[derive(Debug, Clone)]
pub struct CommandValidator {
    pub max_args: usize,
    pub max_length: usize,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self {
            max_args: 256,
            max_length: 8192,
        }
    }
}

impl CommandValidator {
    pub fn new(max_args: usize, max_length: usize) -> Self {
        Self {
            max_args,
            max_length,
        }
    }

    /// Validates and splits `command`. Validation is idempotent: calling it
    /// again on the joined, re-escaped form of the returned argv yields the
    /// same verdict.
    pub fn validate(&self, command: &str) -> Result<Vec<String>> {
        let result = self.validate_inner(command);
        if let Err(err) = &result {
            tracing::warn!(command, error = %err, "sandbox denied command");
        }
        result
    }

    fn validate_inner(&self, command: &str) -> Result<Vec<String>> {
        if command.len() > self.max_length {
            return Err(SandboxError::CommandTooLong {
                actual: command.len(),
                max: self.max_length,
            });
        }

        if command.chars().any(|c| c.is_control() && c != '\t') {
            return Err(SandboxError::ControlCharacter);
        }

        for &metachar in &BANNED_METACHARACTERS {
            if command.contains(metachar) {
                return Err(SandboxError::ShellMetacharacter(metachar));
            }
        }

        for &fragment in &BANNED_FRAGMENTS {
            if command.contains(fragment) {
                return Err(SandboxError::BannedFragment(fragment.to_string()));
            }
        }

        let argv = shlex::split(command)
            .ok_or_else(|| SandboxError::SplitFailed(command.to_string()))?;

        if argv.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }

        if argv.len() > self.max_args {
            return Err(SandboxError::TooManyArguments {
                actual: argv.len(),
                max: self.max_args,
            });
        }

        for arg in &argv {
            if arg.contains("..") {
                return Err(SandboxError::ForbiddenArgumentPath(arg.clone()));
            }
            if arg.starts_with("/dev") || arg.contains(":/dev") {
                return Err(SandboxError::ForbiddenArgumentPath(arg.clone()));
            }
        }

        Ok(argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_commands() {
        let validator = CommandValidator::default();
        assert_eq!(
            validator.validate("echo hello world").expect("valid"),
            vec!["echo", "hello", "world"]
        );
    }

    #[test]
    fn rejects_metacharacters() {
        let validator = CommandValidator::default();
        assert!(validator.validate("echo hi; rm -rf /tmp").is_err());
        assert!(validator.validate("cat file | grep x").is_err());
    }

    #[test]
    fn rejects_banned_fragments() {
        let validator = CommandValidator::default();
        assert!(matches!(
            validator.validate("rm -rf /"),
            Err(SandboxError::BannedFragment(_))
        ));
        assert!(matches!(
            validator.validate("mkfs.ext4 /dev/sda1"),
            Err(_)
        ));
    }

    #[test]
    fn rejects_parent_and_dev_arguments() {
        let validator = CommandValidator::default();
        assert!(validator.validate("cat ../secret").is_err());
        assert!(validator.validate("cat /dev/sda").is_err());
    }

    #[test]
    fn boundary_length_is_accepted_one_over_is_rejected() {
        let validator = CommandValidator::new(256, 10);
        let exact = "echo 1234"; // 9 bytes
        assert!(validator.validate(exact).is_ok());
        let over = "echo 12345"; // 10 bytes, still <= 10
        assert!(validator.validate(over).is_ok());
        let too_long = "echo 123456"; // 11 bytes
        assert!(matches!(
            validator.validate(too_long),
            Err(SandboxError::CommandTooLong { .. })
        ));
    }

    #[test]
    fn validation_is_idempotent_for_accepted_commands() {
        let validator = CommandValidator::default();
        let argv = validator.validate("echo hello world").expect("valid");
        let rejoined = shlex::try_join(argv.iter().map(|s| s.as_str())).expect("join");
        let argv2 = validator.validate(&rejoined).expect("re-validate");
        assert_eq!(argv, argv2);
    }
}

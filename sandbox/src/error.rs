/// Errors raised by the sandbox's three admission guards.
///
/// All of these are "Policy" errors in the taxonomy sense: fatal for the
/// failing tool call, never fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path is empty")]
    EmptyPath,

    #[error("path contains parent traversal: {0}")]
    ParentTraversal(String),

    #[error("path exceeds maximum depth of {max} segments: {path}")]
    TooDeep { path: String, max: usize },

    #[error("path component is a symlink: {0}")]
    Symlink(String),

    #[error("path is not under any allowed root: {0}")]
    PathDenied(String),

    #[error("command contains a control character")]
    ControlCharacter,

    #[error("command contains a shell metacharacter: {0:?}")]
    ShellMetacharacter(char),

    #[error("command contains a banned fragment: {0}")]
    BannedFragment(String),

    #[error("argument references a forbidden path: {0}")]
    ForbiddenArgumentPath(String),

    #[error("command has {actual} arguments, exceeding the maximum of {max}")]
    TooManyArguments { actual: usize, max: usize },

    #[error("command is {actual} bytes, exceeding the maximum of {max}")]
    CommandTooLong { actual: usize, max: usize },

    #[error("failed to split command: {0}")]
    SplitFailed(String),

    #[error("command is empty")]
    EmptyCommand,

    #[error("network access to {0} is denied")]
    NetworkDenied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

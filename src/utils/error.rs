use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Unregistered hook: {hook}")]
    UnregisteredHook { hook: String },

    #[error("Hook registered more than once: {hook}")]
    DuplicateHook { hook: String },

    #[error("Command `{command}` failed with status {code:?}: {output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Missing environment variable: {var}")]
    MissingEnvironment { var: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Container runtime error: {message}")]
    RuntimeError { message: String },
}

impl ReconcileError {
    /// Process exit code for a hook that failed with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconcileError::UnregisteredHook { .. } | ReconcileError::DuplicateHook { .. } => 2,
            ReconcileError::TomlError(_)
            | ReconcileError::MissingEnvironment { .. }
            | ReconcileError::ConfigError { .. }
            | ReconcileError::InvalidConfigValueError { .. } => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

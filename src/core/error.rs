use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagegateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("git error: {0}")]
    GitError(String),
    #[error("Reference point '{0}' cannot be resolved to a commit")]
    ReferenceUnresolved(String),
    #[error("Required store missing: {0}")]
    MissingStore(String),
    #[error("Phase order {phase_order} declared by both '{first}' and '{second}'")]
    DuplicatePhase {
        phase_order: i64,
        first: String,
        second: String,
    },
    #[error("Malformed store {file}: {message}")]
    MalformedStore { file: String, message: String },
    #[error("Gate could not be evaluated: {0}")]
    GateAborted(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl StagegateError {
    /// Process exit status for this error: 1 for a failed gate, 2 for anything structural.
    pub fn exit_code(&self) -> i32 {
        match self {
            StagegateError::ValidationError(_) => 1,
            _ => 2,
        }
    }

    /// True when the error means a check could not be evaluated at all.
    pub fn is_structural(&self) -> bool {
        self.exit_code() == 2
    }
}

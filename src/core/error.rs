use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationError {
    #[error("Search backend error: {message}")]
    Backend { message: String, transient: bool },

    #[error("Search backend rejected request ({status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("Migration '{migration}' failed: {message}")]
    Fatal { migration: String, message: String },

    #[error("Migration '{migration}' does not implement {what}")]
    NotImplemented { migration: String, what: String },

    #[error("Migration '{migration}' failed to delete documents (task {task_id}): {detail}")]
    TaskFailed {
        migration: String,
        task_id: String,
        detail: String,
    },

    #[error("Migration '{migration}' is obsolete and must not run")]
    Obsolete { migration: String },

    #[error(
        "Migration '{migration}' requires {required_bytes} bytes but only {available_bytes} are available"
    )]
    InsufficientSpace {
        migration: String,
        required_bytes: u64,
        available_bytes: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration state error: {0}")]
    State(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Migration version {0} is registered twice")]
    DuplicateVersion(u64),

    #[error("Invalid document reference: {0}")]
    InvalidDocumentReference(String),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(migration: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            migration: migration.into(),
            message: message.into(),
        }
    }

    /// Whether the scheduler may re-invoke the migration after this error.
    ///
    /// Only backend hiccups (timeouts, overload, unavailable nodes) qualify.
    /// Data-integrity, contract and halted-by-design errors never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                transient: true,
                ..
            }
        )
    }

    /// Stable error class name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Backend { transient: true, .. } => "BackendTransient",
            Self::Backend { .. } => "Backend",
            Self::BackendRejected { .. } => "BackendRejected",
            Self::Fatal { .. } => "Fatal",
            Self::NotImplemented { .. } => "NotImplemented",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::Obsolete { .. } => "Obsolete",
            Self::InsufficientSpace { .. } => "InsufficientSpace",
            Self::Config(_) => "Config",
            Self::State(_) => "State",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
            Self::DuplicateVersion(_) => "DuplicateVersion",
            Self::InvalidDocumentReference(_) => "InvalidDocumentReference",
        }
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout() || err.is_connect();
        Self::Backend {
            message: err.to_string(),
            transient,
        }
    }
}

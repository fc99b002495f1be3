#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("memory limit of {limit_mb} MB exceeded")]
    MemoryExceeded { limit_mb: u32 },

    #[error("execution exceeded {timeout_ms} ms")]
    Timeout { timeout_ms: u32 },

    #[error("too many concurrent executions (max {max})")]
    ConcurrencyLimit { max: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sandbox creation failed: {0}")]
    CreationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SandboxError {
    /// Stable, machine-readable name of the failure cause.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Compile(_) => "compile",
            Self::Runtime(_) => "runtime",
            Self::MemoryExceeded { .. } => "memory_limit",
            Self::Timeout { .. } => "timeout",
            Self::ConcurrencyLimit { .. } => "concurrency_limit",
            Self::InvalidInput(_) => "invalid_input",
            Self::CreationFailed(_) => "creation_failed",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// `true` when the generated code itself is at fault, as opposed to the host.
    pub fn is_program_fault(&self) -> bool {
        matches!(
            self,
            Self::Compile(_) | Self::Runtime(_) | Self::MemoryExceeded { .. } | Self::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

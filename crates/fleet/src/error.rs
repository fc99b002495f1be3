/// Failure reported by a compute provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{operation} {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation}: {detail}")]
    Transport {
        operation: &'static str,
        detail: String,
    },

    #[error("app {0} already exists")]
    AppExists(String),

    #[error("image build: {0}")]
    Build(String),

    #[error("{operation} decode: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },
}

impl ProviderError {
    pub(crate) fn transport(operation: &'static str, e: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            detail: e.to_string(),
        }
    }

    pub(crate) fn decode(operation: &'static str, e: impl std::fmt::Display) -> Self {
        Self::Decode {
            operation,
            detail: e.to_string(),
        }
    }
}

/// Failure of a fleet operation, as seen by the caller.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{operation} failed: {source}")]
    Infra {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("image build failed: {0}")]
    Build(#[source] ProviderError),

    /// The compensating delete failed too; the app may still exist.
    #[error("{cause}; rollback of app {app} also failed: {rollback}")]
    RollbackFailed {
        app: String,
        cause: Box<FleetError>,
        rollback: ProviderError,
    },

    /// The detached provisioning task panicked or was cancelled by runtime
    /// shutdown before it reached a final state.
    #[error("provisioning task ended without a result: {0}")]
    Interrupted(String),
}

impl FleetError {
    pub(crate) fn infra(operation: &'static str, source: ProviderError) -> Self {
        Self::Infra { operation, source }
    }

    /// `true` for malformed requests, which are never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type FleetResult<T> = Result<T, FleetError>;

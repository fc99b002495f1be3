use crate::error::{FleetError, FleetResult};

const MAX_LEN: usize = 63;

/// Validated workspace identifier.
///
/// Doubles as the provider app name and the image repository name, so it is
/// restricted to lowercase ASCII letters, digits and inner hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn parse(raw: &str) -> FleetResult<Self> {
        if raw.is_empty() {
            return Err(FleetError::Validation("workspaceId is empty".into()));
        }
        if raw.len() > MAX_LEN {
            return Err(FleetError::Validation(format!(
                "workspaceId is longer than {MAX_LEN} characters"
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(FleetError::Validation(format!(
                "workspaceId {raw:?} may only contain lowercase letters, digits and '-'"
            )));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(FleetError::Validation(format!(
                "workspaceId {raw:?} must not start or end with '-'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

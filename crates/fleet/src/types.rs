use serde::{Deserialize, Serialize};

use crate::workspace::WorkspaceId;

/// Machine size requested from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSpec {
    pub cpu_kind: String,
    pub cpus: u32,
    pub memory_mb: u32,
}

impl Default for GuestSpec {
    fn default() -> Self {
        Self {
            cpu_kind: "shared".into(),
            cpus: 1,
            memory_mb: 256,
        }
    }
}

/// `{registry}/{workspaceId}:{tag}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(registry: &str, workspace: &WorkspaceId, tag: &str) -> Self {
        Self(format!("{}/{workspace}:{tag}", registry.trim_end_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A provider app scoped to one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppHandle {
    pub name: String,
}

/// What to launch inside an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    pub image: ImageRef,
    pub guest: GuestSpec,
    /// Port the image listens on; the provider routes public 80/443 to it.
    pub internal_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub id: String,
    pub image: ImageRef,
    pub guest: GuestSpec,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    /// The tenant's own application image (`latest`).
    Application,
    /// The sandbox-hosting executor image (`executor`).
    Executor,
}

impl std::fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application => f.write_str("application"),
            Self::Executor => f.write_str("executor"),
        }
    }
}

/// Everything the controller needs to provision one kind of machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub kind: DeploymentKind,
    /// Local build context directory, or an image reference to retag.
    pub source_image: String,
    pub tag: String,
    pub guest: GuestSpec,
    pub internal_port: u16,
}

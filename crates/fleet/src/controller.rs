use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{FleetError, FleetResult, ProviderError};
use crate::locks::WorkspaceLocks;
use crate::provider::ComputeProvider;
use crate::types::{AppHandle, Deployment, ImageRef, Machine, MachineSpec};
use crate::workspace::WorkspaceId;

/// Progress of one provisioning sequence.
///
/// `start → app_created → ip_allocated → image_built → machine_created`.
/// `adopted` marks an app that already existed before this sequence began;
/// such an app is never rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    Start,
    AppCreated {
        app: AppHandle,
        adopted: bool,
    },
    IpAllocated {
        app: AppHandle,
        adopted: bool,
    },
    ImageBuilt {
        app: AppHandle,
        adopted: bool,
        image: ImageRef,
    },
    MachineCreated {
        machine: Machine,
    },
}

impl ProvisionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AppCreated { .. } => "app_created",
            Self::IpAllocated { .. } => "ip_allocated",
            Self::ImageBuilt { .. } => "image_built",
            Self::MachineCreated { .. } => "machine_created",
        }
    }

    /// The app this sequence created and is therefore responsible for.
    fn owned_app(&self) -> Option<&AppHandle> {
        match self {
            Self::AppCreated { app, adopted }
            | Self::IpAllocated { app, adopted }
            | Self::ImageBuilt { app, adopted, .. } => (!adopted).then_some(app),
            Self::Start | Self::MachineCreated { .. } => None,
        }
    }
}

/// The two machine kinds a workspace can run.
#[derive(Debug, Clone)]
pub struct Deployments {
    pub application: Deployment,
    pub executor: Deployment,
}

/// Creates and tears down per-workspace compute, leaving no partially
/// provisioned app behind when any step fails or the caller goes away.
///
/// Clones share the provider and the per-workspace locks.
#[derive(Clone)]
pub struct FleetController {
    provider: Arc<dyn ComputeProvider>,
    deployments: Arc<Deployments>,
    locks: Arc<WorkspaceLocks>,
}

impl FleetController {
    pub fn new(provider: Arc<dyn ComputeProvider>, deployments: Deployments) -> Self {
        Self {
            provider,
            deployments: Arc::new(deployments),
            locks: Arc::new(WorkspaceLocks::new()),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Provision the sandbox-hosting executor machine for a workspace.
    pub async fn create_workspace_compute(&self, workspace: &WorkspaceId) -> FleetResult<Machine> {
        self.provision(workspace, &self.deployments.executor).await
    }

    /// Provision the workspace's own application machine.
    pub async fn create_application_machine(
        &self,
        workspace: &WorkspaceId,
    ) -> FleetResult<Machine> {
        self.provision(workspace, &self.deployments.application).await
    }

    /// Delete the workspace's app and everything in it. Deleting a workspace
    /// that has no app succeeds.
    pub async fn delete_workspace_compute(&self, workspace: &WorkspaceId) -> FleetResult<()> {
        let _guard = self.locks.lock(workspace).await;
        info!(workspace_id = %workspace, "deleting workspace compute");
        self.provider
            .delete_app(workspace)
            .await
            .map_err(|e| FleetError::infra("delete app", e))?;
        info!(workspace_id = %workspace, "workspace compute deleted");
        Ok(())
    }

    pub async fn workspace_exists(&self, workspace: &WorkspaceId) -> FleetResult<bool> {
        self.provider
            .app_exists(workspace)
            .await
            .map_err(|e| FleetError::infra("get app", e))
    }

    /// Run the provisioning sequence on its own task. Dropping the returned
    /// future does not stop it: the task still ends at `machine_created` or
    /// after rollback.
    async fn provision(
        &self,
        workspace: &WorkspaceId,
        deployment: &Deployment,
    ) -> FleetResult<Machine> {
        let this = self.clone();
        let workspace = workspace.clone();
        let deployment = deployment.clone();
        tokio::spawn(async move { this.run_sequence(&workspace, &deployment).await })
            .await
            .map_err(|e| FleetError::Interrupted(e.to_string()))?
    }

    async fn run_sequence(
        &self,
        workspace: &WorkspaceId,
        deployment: &Deployment,
    ) -> FleetResult<Machine> {
        let _guard = self.locks.lock(workspace).await;
        info!(workspace_id = %workspace, kind = %deployment.kind, tag = %deployment.tag, "provisioning");

        let mut state = ProvisionState::Start;
        loop {
            if let ProvisionState::MachineCreated { machine } = state {
                info!(workspace_id = %workspace, kind = %deployment.kind, machine_id = %machine.id, "provisioned");
                return Ok(machine);
            }
            state = match self.advance(workspace, deployment, &state).await {
                Ok(next) => next,
                Err(cause) => {
                    return Err(self.rollback_on_failure_from(workspace, &state, cause).await);
                }
            };
        }
    }

    /// Perform the single provider call that leads out of `state`.
    async fn advance(
        &self,
        workspace: &WorkspaceId,
        deployment: &Deployment,
        state: &ProvisionState,
    ) -> FleetResult<ProvisionState> {
        info!(workspace_id = %workspace, step = state.name(), "provision step");
        match state {
            ProvisionState::Start => match self.provider.create_app(workspace).await {
                Ok(app) => Ok(ProvisionState::AppCreated {
                    app,
                    adopted: false,
                }),
                Err(ProviderError::AppExists(name)) => {
                    info!(workspace_id = %workspace, app = %name, "adopting existing app");
                    Ok(ProvisionState::AppCreated {
                        app: AppHandle { name },
                        adopted: true,
                    })
                }
                Err(e) => Err(FleetError::infra("create app", e)),
            },
            // Adopted apps go through this too: an earlier attempt may have
            // stopped before its IP was allocated. Allocation is idempotent.
            ProvisionState::AppCreated { app, adopted } => {
                self.provider
                    .allocate_ip(workspace)
                    .await
                    .map_err(|e| FleetError::infra("allocate ip", e))?;
                Ok(ProvisionState::IpAllocated {
                    app: app.clone(),
                    adopted: *adopted,
                })
            }
            ProvisionState::IpAllocated { app, adopted } => {
                let image = self
                    .provider
                    .build_and_push_image(workspace, &deployment.source_image, &deployment.tag)
                    .await
                    .map_err(FleetError::Build)?;
                Ok(ProvisionState::ImageBuilt {
                    app: app.clone(),
                    adopted: *adopted,
                    image,
                })
            }
            ProvisionState::ImageBuilt { image, .. } => {
                let spec = MachineSpec {
                    image: image.clone(),
                    guest: deployment.guest.clone(),
                    internal_port: deployment.internal_port,
                };
                let machine = self
                    .provider
                    .create_machine(workspace, &spec)
                    .await
                    .map_err(|e| FleetError::infra("create machine", e))?;
                Ok(ProvisionState::MachineCreated { machine })
            }
            ProvisionState::MachineCreated { .. } => Ok(state.clone()),
        }
    }

    /// Undo whatever this sequence created before `state` failed with `cause`,
    /// and return the error to report.
    ///
    /// An app created by this sequence is deleted; an adopted app and the
    /// start state leave nothing to undo. When the delete itself fails the
    /// result is [`FleetError::RollbackFailed`], naming the app that may leak.
    pub async fn rollback_on_failure_from(
        &self,
        workspace: &WorkspaceId,
        state: &ProvisionState,
        cause: FleetError,
    ) -> FleetError {
        let Some(app) = state.owned_app() else {
            warn!(workspace_id = %workspace, failed_from = state.name(), error = %cause, "provisioning failed, nothing to roll back");
            return cause;
        };

        warn!(workspace_id = %workspace, failed_from = state.name(), error = %cause, "provisioning failed, rolling back");
        match self.provider.delete_app(workspace).await {
            Ok(()) => {
                info!(workspace_id = %workspace, app = %app.name, "rollback complete");
                cause
            }
            Err(rollback) => {
                error!(workspace_id = %workspace, app = %app.name, error = %rollback, "rollback failed");
                FleetError::RollbackFailed {
                    app: app.name.clone(),
                    cause: Box::new(cause),
                    rollback,
                }
            }
        }
    }
}

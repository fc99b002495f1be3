//! Per-workspace compute provisioning.
//!
//! [`FleetController`] drives a [`ComputeProvider`] through
//! app → IP → image → machine and deletes the app again if any later step
//! fails, so a workspace is either fully provisioned or absent.

mod command;
mod controller;
mod error;
mod http;
mod image;
mod locks;
mod machines;
mod memory;
mod provider;
mod types;
mod workspace;

pub use controller::{Deployments, FleetController, ProvisionState};
pub use error::{FleetError, FleetResult, ProviderError};
pub use http::HttpClient;
pub use image::{DockerImageBuilder, ImageBuilder, RegistryAuth};
pub use locks::{WorkspaceGuard, WorkspaceLocks};
pub use machines::FlyClient;
pub use memory::{AppRecord, FailPoint, InMemoryProvider};
pub use provider::{ComputeProvider, FlyProvider};
pub use types::{AppHandle, Deployment, DeploymentKind, GuestSpec, ImageRef, Machine, MachineSpec};
pub use workspace::WorkspaceId;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::ComputeProvider;
use crate::types::{AppHandle, ImageRef, Machine, MachineSpec};
use crate::workspace::WorkspaceId;

/// Provider operation that [`InMemoryProvider`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateApp,
    AllocateIp,
    BuildImage,
    CreateMachine,
    DeleteApp,
}

/// Everything the provider holds for one app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppRecord {
    pub ip_allocated: bool,
    pub images: BTreeSet<String>,
    pub machines: Vec<Machine>,
}

/// Provider kept entirely in process memory.
///
/// Backs local runs without provider credentials, and tests that need to
/// fail a chosen step. Deleting an app drops its IP, images and machines.
pub struct InMemoryProvider {
    registry: String,
    apps: Mutex<BTreeMap<WorkspaceId, AppRecord>>,
    failures: Mutex<HashSet<FailPoint>>,
    next_machine: AtomicU64,
}

impl InMemoryProvider {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            apps: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashSet::new()),
            next_machine: AtomicU64::new(1),
        }
    }

    /// Make every later call of `point` fail until [`Self::clear_failures`].
    pub fn fail_at(&self, point: FailPoint) {
        lock(&self.failures).insert(point);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    pub fn app(&self, workspace: &WorkspaceId) -> Option<AppRecord> {
        lock(&self.apps).get(workspace).cloned()
    }

    pub fn app_count(&self) -> usize {
        lock(&self.apps).len()
    }

    fn check(&self, point: FailPoint, operation: &'static str) -> Result<(), ProviderError> {
        if !lock(&self.failures).contains(&point) {
            return Ok(());
        }
        debug!(?point, "injected provider failure");
        match point {
            FailPoint::BuildImage => Err(ProviderError::Build(format!("{operation}: injected failure"))),
            _ => Err(ProviderError::Api {
                operation,
                status: 500,
                body: "injected failure".into(),
            }),
        }
    }

    fn missing(operation: &'static str, workspace: &WorkspaceId) -> ProviderError {
        ProviderError::Api {
            operation,
            status: 404,
            body: format!("app {workspace} not found"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ComputeProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_app(&self, workspace: &WorkspaceId) -> Result<AppHandle, ProviderError> {
        self.check(FailPoint::CreateApp, "create app")?;
        let mut apps = lock(&self.apps);
        if apps.contains_key(workspace) {
            return Err(ProviderError::AppExists(workspace.to_string()));
        }
        apps.insert(workspace.clone(), AppRecord::default());
        Ok(AppHandle {
            name: workspace.to_string(),
        })
    }

    async fn allocate_ip(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        self.check(FailPoint::AllocateIp, "allocate ip")?;
        let mut apps = lock(&self.apps);
        let app = apps
            .get_mut(workspace)
            .ok_or_else(|| Self::missing("allocate ip", workspace))?;
        app.ip_allocated = true;
        Ok(())
    }

    async fn build_and_push_image(
        &self,
        workspace: &WorkspaceId,
        _source: &str,
        tag: &str,
    ) -> Result<ImageRef, ProviderError> {
        self.check(FailPoint::BuildImage, "build image")?;
        let image = ImageRef::new(&self.registry, workspace, tag);
        let mut apps = lock(&self.apps);
        let app = apps
            .get_mut(workspace)
            .ok_or_else(|| Self::missing("build image", workspace))?;
        app.images.insert(image.to_string());
        Ok(image)
    }

    async fn create_machine(
        &self,
        workspace: &WorkspaceId,
        spec: &MachineSpec,
    ) -> Result<Machine, ProviderError> {
        self.check(FailPoint::CreateMachine, "create machine")?;
        let mut apps = lock(&self.apps);
        let app = apps
            .get_mut(workspace)
            .ok_or_else(|| Self::missing("create machine", workspace))?;
        let machine = Machine {
            id: format!("m-{}", self.next_machine.fetch_add(1, Ordering::SeqCst)),
            image: spec.image.clone(),
            guest: spec.guest.clone(),
            state: Some("started".into()),
        };
        app.machines.push(machine.clone());
        Ok(machine)
    }

    async fn delete_app(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        self.check(FailPoint::DeleteApp, "delete app")?;
        lock(&self.apps).remove(workspace);
        Ok(())
    }

    async fn app_exists(&self, workspace: &WorkspaceId) -> Result<bool, ProviderError> {
        Ok(lock(&self.apps).contains_key(workspace))
    }
}

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::factory::SandboxFactory;
use crate::sandbox::Sandbox;
use crate::types::Program;

/// Lifecycle of a single sandbox instance. Every invocation starts over at
/// `Created`; there is no pooled or reusable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    ContextInitialized,
    Compiled,
    Running,
    Completed,
    Faulted,
    Disposed,
}

/// Owns a sandbox instance for the duration of one invocation and hands it
/// back to the factory when dropped, on every exit path including unwinding.
pub(crate) struct InstanceGuard<'f> {
    factory: &'f dyn SandboxFactory,
    sandbox: Option<Box<dyn Sandbox>>,
    state: SandboxState,
}

impl<'f> InstanceGuard<'f> {
    pub(crate) fn acquire(factory: &'f dyn SandboxFactory, config: &SandboxConfig) -> Result<Self> {
        let sandbox = factory.create(config)?;
        debug!(
            sandbox_id = %sandbox.id(),
            factory = factory.name(),
            memory_mb = config.resources.memory_mb,
            "sandbox created"
        );
        Ok(Self {
            factory,
            sandbox: Some(sandbox),
            state: SandboxState::Created,
        })
    }

    pub(crate) fn state(&self) -> SandboxState {
        self.state
    }

    pub(crate) fn inject_all<'a, I>(&mut self, globals: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let sandbox = self.instance()?;
        let outcome = globals
            .into_iter()
            .try_for_each(|(name, value)| sandbox.inject(name, value));
        self.settle(outcome, SandboxState::ContextInitialized)
    }

    pub(crate) fn compile(&mut self, program: &Program) -> Result<()> {
        let outcome = self.instance()?.compile(program);
        self.settle(outcome, SandboxState::Compiled)
    }

    pub(crate) async fn run(&mut self) -> Result<Value> {
        self.transition(SandboxState::Running);
        let outcome = self.instance()?.run().await;
        self.settle(outcome, SandboxState::Completed)
    }

    fn instance(&mut self) -> Result<&mut Box<dyn Sandbox>> {
        self.sandbox
            .as_mut()
            .ok_or_else(|| SandboxError::Internal("sandbox already disposed".into()))
    }

    fn settle<T>(&mut self, outcome: Result<T>, on_success: SandboxState) -> Result<T> {
        match &outcome {
            Ok(_) => self.transition(on_success),
            Err(_) => self.transition(SandboxState::Faulted),
        }
        outcome
    }

    fn transition(&mut self, next: SandboxState) {
        debug!(from = ?self.state, to = ?next, "sandbox state");
        self.state = next;
    }
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        let Some(sandbox) = self.sandbox.take() else {
            return;
        };
        if std::thread::panicking() {
            warn!(sandbox_id = %sandbox.id(), state = ?self.state, "disposing sandbox after panic");
        }
        let id = sandbox.id().to_string();
        self.factory.destroy(sandbox);
        debug!(sandbox_id = %id, from = ?self.state, "sandbox disposed");
        self.state = SandboxState::Disposed;
    }
}

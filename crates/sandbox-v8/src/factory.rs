use sandbox::{Sandbox, SandboxConfig, SandboxFactory};
use tracing::debug;

use crate::sandbox::V8Sandbox;

/// Hands out one fresh V8 isolate per invocation. Stateless: nothing is
/// pooled, cached, or shared between the isolates it creates.
#[derive(Debug, Default, Clone, Copy)]
pub struct V8Factory;

impl V8Factory {
    pub fn new() -> Self {
        Self
    }
}

impl SandboxFactory for V8Factory {
    fn name(&self) -> &str {
        "v8"
    }

    fn create(&self, config: &SandboxConfig) -> sandbox::Result<Box<dyn Sandbox>> {
        Ok(Box::new(V8Sandbox::create(config)?))
    }

    fn destroy(&self, sandbox: Box<dyn Sandbox>) {
        let id = sandbox.id().to_string();
        // Dropping the runtime tears down the isolate and its whole heap.
        drop(sandbox);
        debug!(sandbox_id = %id, "isolate destroyed");
    }
}

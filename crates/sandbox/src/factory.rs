use crate::config::SandboxConfig;
use crate::error::Result;
use crate::sandbox::Sandbox;

/// Creates and disposes sandbox instances.
///
/// Injected into [`crate::SandboxEngine`] at construction so callers (and
/// tests) choose the backend without touching process-wide state. Both
/// methods are called on the invocation's own thread; the instances they
/// hand out never leave it.
pub trait SandboxFactory: Send + Sync {
    /// Human-readable name for this factory implementation (e.g. "v8").
    fn name(&self) -> &str;
    /// Create a fresh, isolated instance with its own execution context.
    fn create(&self, config: &SandboxConfig) -> Result<Box<dyn Sandbox>>;
    /// Release every resource held by the instance.
    fn destroy(&self, sandbox: Box<dyn Sandbox>);
}

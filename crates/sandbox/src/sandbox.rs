use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::Program;

/// One disposable, memory-bounded execution context.
///
/// Instances are single-use: values are injected, one program is compiled
/// and run, and the instance is handed back to its factory for disposal.
/// Everything crossing the boundary is an owned [`Value`] copy.
#[async_trait(?Send)]
pub trait Sandbox {
    fn id(&self) -> &str;

    /// Copy `value` into the sandbox's global scope under `name`.
    fn inject(&mut self, name: &str, value: &Value) -> Result<()>;
    /// Parse `program` without running it. Syntax errors surface as
    /// [`crate::SandboxError::Compile`].
    fn compile(&mut self, program: &Program) -> Result<()>;
    /// Run the compiled program, awaiting asynchronous completion, and copy
    /// the result out.
    async fn run(&mut self) -> Result<Value>;
}

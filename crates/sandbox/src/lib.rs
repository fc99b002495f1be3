mod config;
mod engine;
mod error;
mod factory;
mod guard;
mod sandbox;
mod types;

pub use config::{DEFAULT_MAX_CONCURRENT, DEFAULT_MEMORY_MB, EngineConfig, ResourceLimits, SandboxConfig};
pub use engine::SandboxEngine;
pub use error::{Result, SandboxError};
pub use factory::SandboxFactory;
pub use guard::SandboxState;
pub use sandbox::Sandbox;
pub use types::{CodeModule, INPUTS_GLOBAL, Program, ProgramKind, Script, ScriptContext, is_identifier};

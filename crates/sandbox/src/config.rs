use std::time::Duration;

/// Memory ceiling applied to every sandbox instance unless configured otherwise.
pub const DEFAULT_MEMORY_MB: u32 = 128;
/// Simultaneous invocations admitted by a [`crate::SandboxEngine`].
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    /// Wall-clock budget for a single run. `None` means the run is bounded
    /// only by the memory ceiling.
    pub timeout_ms: Option<u32>,
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> usize {
        (self.memory_mb as usize) * 1024 * 1024
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: DEFAULT_MEMORY_MB,
            timeout_ms: None,
        }
    }
}

/// Per-instance configuration handed to [`crate::SandboxFactory::create`].
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub id: uuid::Uuid,
    pub resources: ResourceLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub limits: ResourceLimits,
    pub max_concurrent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

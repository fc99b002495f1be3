use std::sync::Arc;

use async_trait::async_trait;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions, v8};
use sandbox::{Program, ResourceLimits, Sandbox, SandboxConfig, SandboxError};
use serde_json::Value;
use tracing::debug;

use crate::harness::{self, Report};
use crate::limits::{BufferBudget, HeapLimitState, Watchdog, near_heap_limit_callback};
use crate::ops::{HarnessReport, sandbox_ext};

/// One V8 isolate with a fixed memory ceiling, applied both to the V8 heap
/// and to ArrayBuffer backing stores.
///
/// Field order matters: `runtime` is dropped before `heap`, so the isolate
/// is gone before the state its heap callback points at is freed.
pub struct V8Sandbox {
    runtime: JsRuntime,
    heap: Box<HeapLimitState>,
    buffers: Arc<BufferBudget>,
    id: String,
    limits: ResourceLimits,
    program: Option<Program>,
}

impl V8Sandbox {
    pub fn create(config: &SandboxConfig) -> sandbox::Result<Self> {
        let limits = config.resources.clone();
        let buffers = BufferBudget::new(limits.memory_bytes());
        let create_params = v8::CreateParams::default()
            .heap_limits(0, limits.memory_bytes())
            .array_buffer_allocator(buffers.allocator());
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![sandbox_ext::init()],
            create_params: Some(create_params),
            ..Default::default()
        });

        let heap = HeapLimitState::new(runtime.v8_isolate().thread_safe_handle());
        runtime
            .v8_isolate()
            .add_near_heap_limit_callback(near_heap_limit_callback, heap.as_callback_data());

        runtime
            .execute_script("[sandbox:bootstrap]", harness::BOOTSTRAP)
            .map_err(|e| SandboxError::CreationFailed(format!("bootstrap: {e}")))?;

        Ok(Self {
            runtime,
            heap,
            buffers,
            id: config.id.to_string(),
            limits,
            program: None,
        })
    }

    fn take_report(&mut self) -> sandbox::Result<Option<Report>> {
        let report = self
            .runtime
            .op_state()
            .borrow_mut()
            .try_take::<HarnessReport>();
        match report {
            Some(HarnessReport(json)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn memory_exceeded(&self) -> bool {
        self.heap.triggered() || self.buffers.exceeded()
    }

    /// Map an engine-level failure, giving the memory ceiling priority: a
    /// terminated isolate reports a generic "execution terminated" error.
    fn failure(&self, message: String, otherwise: fn(String) -> SandboxError) -> SandboxError {
        if self.memory_exceeded() {
            SandboxError::MemoryExceeded {
                limit_mb: self.limits.memory_mb,
            }
        } else {
            otherwise(message)
        }
    }
}

#[async_trait(?Send)]
impl Sandbox for V8Sandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn inject(&mut self, name: &str, value: &Value) -> sandbox::Result<()> {
        let script = harness::assign_global(name, value)?;
        match self.runtime.execute_script("[sandbox:inject]", script) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.failure(e.to_string(), SandboxError::Internal)),
        }
    }

    /// Parses the source as a classic script, the same goal `run` evaluates
    /// it under, without executing any of it.
    fn compile(&mut self, program: &Program) -> sandbox::Result<()> {
        {
            let scope = &mut self.runtime.handle_scope();
            let code = v8::String::new(scope, &program.source)
                .ok_or_else(|| SandboxError::InvalidInput("program source is too large".into()))?;
            let scope = &mut v8::TryCatch::new(scope);
            if v8::Script::compile(scope, code, None).is_none() {
                let message = scope
                    .exception()
                    .map(|e| e.to_rust_string_lossy(scope))
                    .unwrap_or_else(|| "program failed to compile".into());
                return Err(SandboxError::Compile(message));
            }
        }
        debug!(sandbox_id = %self.id, kind = %program.kind, bytes = program.source.len(), "program compiled");
        self.program = Some(program.clone());
        Ok(())
    }

    async fn run(&mut self) -> sandbox::Result<Value> {
        let program = self
            .program
            .take()
            .ok_or_else(|| SandboxError::Internal("run called before compile".into()))?;
        let script = harness::run(&program.source)?;

        let watchdog = self
            .limits
            .timeout()
            .map(|budget| Watchdog::arm(self.runtime.v8_isolate().thread_safe_handle(), budget));

        let outcome = match self.runtime.execute_script("[sandbox:run]", script) {
            Ok(_) => self
                .runtime
                .run_event_loop(PollEventLoopOptions::default())
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let timed_out = watchdog.is_some_and(Watchdog::disarm);

        if self.memory_exceeded() {
            return Err(SandboxError::MemoryExceeded {
                limit_mb: self.limits.memory_mb,
            });
        }
        if timed_out {
            return Err(SandboxError::Timeout {
                timeout_ms: self.limits.timeout_ms.unwrap_or_default(),
            });
        }
        if let Err(message) = outcome {
            return Err(SandboxError::Runtime(message));
        }

        match self.take_report()? {
            Some(Report::Ok { value }) => Ok(value),
            Some(Report::Error { error }) => Err(SandboxError::Runtime(error.to_string())),
            None => Err(SandboxError::Runtime(
                "program settled without producing a result".into(),
            )),
        }
    }
}

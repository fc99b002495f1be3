use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{EngineConfig, SandboxConfig};
use crate::error::{Result, SandboxError};
use crate::factory::SandboxFactory;
use crate::guard::InstanceGuard;
use crate::types::{CodeModule, INPUTS_GLOBAL, Program, Script, ScriptContext};

/// Runs generated code in fresh, disposable sandbox instances.
///
/// Every call acquires its own instance from the injected factory on a
/// dedicated thread, so no heap, context, or global survives between calls.
/// `Send + Sync`; share it behind an `Arc`.
pub struct SandboxEngine {
    factory: Arc<dyn SandboxFactory>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
}

/// Owned copy of everything one invocation needs on its thread.
struct Invocation {
    program: Program,
    globals: Map<String, Value>,
}

impl SandboxEngine {
    pub fn new(factory: Arc<dyn SandboxFactory>, config: EngineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            factory,
            config,
            permits,
        }
    }

    pub fn factory_name(&self) -> &str {
        self.factory.name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Call a generated callable with `inputs`.
    ///
    /// Each input is injected as a global of the same name, and the whole map
    /// as `inputs` when the module declares no parameters.
    pub async fn run_code_module(
        &self,
        module: &CodeModule,
        inputs: &Map<String, Value>,
    ) -> Result<Value> {
        module.validate(inputs)?;
        let mut globals = inputs.clone();
        if module.parameters.is_empty() {
            globals.insert(INPUTS_GLOBAL.to_string(), Value::Object(inputs.clone()));
        }
        self.invoke(Invocation {
            program: module.to_program(),
            globals,
        })
        .await
    }

    /// Run a script after injecting every entry of `context` as a global.
    pub async fn run_script(&self, script: &Script, context: &ScriptContext) -> Result<Value> {
        if script.source.trim().is_empty() {
            return Err(SandboxError::InvalidInput("script source is empty".into()));
        }
        self.invoke(Invocation {
            program: script.to_program(),
            globals: context.clone(),
        })
        .await
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        let permit = self.permits.clone().try_acquire_owned().map_err(|_| {
            SandboxError::ConcurrencyLimit {
                max: self.config.max_concurrent,
            }
        })?;

        let config = SandboxConfig {
            id: uuid::Uuid::new_v4(),
            resources: self.config.limits.clone(),
        };
        let sandbox_id = config.id;
        let kind = invocation.program.kind;
        info!(sandbox_id = %sandbox_id, kind = %kind, globals = invocation.globals.len(), "invocation starting");

        let factory = Arc::clone(&self.factory);
        let (tx, rx) = tokio::sync::oneshot::channel();

        // Sandbox instances are !Send: each invocation owns a thread and a
        // single-threaded runtime for its whole lifetime. The permit lives on
        // that thread, so a cancelled caller does not free its slot while the
        // instance is still running.
        std::thread::Builder::new()
            .name(format!("sandbox-{sandbox_id}"))
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(execute(factory.as_ref(), &config, invocation)),
                    Err(e) => Err(SandboxError::CreationFailed(format!("sandbox runtime: {e}"))),
                };
                // Free the slot before the caller can observe the result.
                drop(permit);
                if tx.send(result).is_err() {
                    warn!("sandbox result receiver dropped before result was sent");
                }
            })
            .map_err(|e| SandboxError::CreationFailed(format!("spawn sandbox thread: {e}")))?;

        let result = rx
            .await
            .map_err(|_| SandboxError::Internal("sandbox thread panicked".into()))?;

        match &result {
            Ok(_) => info!(sandbox_id = %sandbox_id, kind = %kind, "invocation complete"),
            Err(e) => warn!(sandbox_id = %sandbox_id, kind = %kind, cause = e.kind(), error = %e, "invocation failed"),
        }
        result
    }
}

/// created → context-initialized → compiled → running → completed | faulted → disposed
async fn execute(
    factory: &dyn SandboxFactory,
    config: &SandboxConfig,
    invocation: Invocation,
) -> Result<Value> {
    let mut guard = InstanceGuard::acquire(factory, config)?;
    guard.inject_all(&invocation.globals)?;
    guard.compile(&invocation.program)?;
    let result = guard.run().await;
    tracing::debug!(sandbox_id = %config.id, state = ?guard.state(), "run finished");
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::guard::SandboxState;
    use crate::sandbox::Sandbox;

    /// What the fake instance should do at each step.
    #[derive(Clone, Copy, Default)]
    enum Behaviour {
        /// Echo the injected globals back as the result.
        #[default]
        EchoGlobals,
        FailCompile,
        FailRun,
        ExceedMemory,
        Panic,
        /// Block the instance's thread for [`SLOW_RUN`], then echo.
        Slow,
    }

    const SLOW_RUN: std::time::Duration = std::time::Duration::from_millis(400);

    #[derive(Default)]
    struct RecordingFactory {
        behaviour: Behaviour,
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl RecordingFactory {
        fn with(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                ..Default::default()
            })
        }

        fn counts(&self) -> (usize, usize) {
            (
                self.created.load(Ordering::SeqCst),
                self.destroyed.load(Ordering::SeqCst),
            )
        }
    }

    struct FakeSandbox {
        id: String,
        behaviour: Behaviour,
        globals: Map<String, Value>,
        limit_mb: u32,
    }

    #[async_trait(?Send)]
    impl Sandbox for FakeSandbox {
        fn id(&self) -> &str {
            &self.id
        }

        fn inject(&mut self, name: &str, value: &Value) -> Result<()> {
            self.globals.insert(name.to_string(), value.clone());
            Ok(())
        }

        fn compile(&mut self, _program: &Program) -> Result<()> {
            match self.behaviour {
                Behaviour::FailCompile => Err(SandboxError::Compile("Unexpected token".into())),
                _ => Ok(()),
            }
        }

        async fn run(&mut self) -> Result<Value> {
            match self.behaviour {
                Behaviour::FailRun => Err(SandboxError::Runtime("Error: boom".into())),
                Behaviour::ExceedMemory => Err(SandboxError::MemoryExceeded {
                    limit_mb: self.limit_mb,
                }),
                Behaviour::Panic => panic!("instance blew up"),
                Behaviour::Slow => {
                    std::thread::sleep(SLOW_RUN);
                    Ok(Value::Object(self.globals.clone()))
                }
                _ => Ok(Value::Object(self.globals.clone())),
            }
        }
    }

    impl SandboxFactory for RecordingFactory {
        fn name(&self) -> &str {
            "recording"
        }

        fn create(&self, config: &SandboxConfig) -> Result<Box<dyn Sandbox>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSandbox {
                id: config.id.to_string(),
                behaviour: self.behaviour,
                globals: Map::new(),
                limit_mb: config.resources.memory_mb,
            }))
        }

        fn destroy(&self, _sandbox: Box<dyn Sandbox>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn engine(factory: Arc<RecordingFactory>) -> SandboxEngine {
        SandboxEngine::new(factory, EngineConfig::default())
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn code_module_injects_inputs_and_disposes() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let engine = engine(factory.clone());
        let module = CodeModule::new("function (x) { return x + 1 }").with_parameters(["x"]);

        let out = engine
            .run_code_module(&module, &map(json!({"x": 41})))
            .await
            .unwrap();

        // Declared parameters are injected individually, without the `inputs` map.
        assert_eq!(out, json!({"x": 41}));
        assert_eq!(factory.counts(), (1, 1));
    }

    #[tokio::test]
    async fn parameterless_module_also_receives_input_map() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let engine = engine(factory.clone());

        let out = engine
            .run_code_module(&CodeModule::new("(i) => i"), &map(json!({"a": [1, 2]})))
            .await
            .unwrap();

        assert_eq!(out, json!({"a": [1, 2], "inputs": {"a": [1, 2]}}));
    }

    #[tokio::test]
    async fn instance_disposed_on_compile_error() {
        let factory = RecordingFactory::with(Behaviour::FailCompile);
        let err = engine(factory.clone())
            .run_script(&Script::new("let ="), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
        assert_eq!(factory.counts(), (1, 1));
    }

    #[tokio::test]
    async fn instance_disposed_on_runtime_error() {
        let factory = RecordingFactory::with(Behaviour::FailRun);
        let err = engine(factory.clone())
            .run_script(&Script::new("throw new Error('boom')"), &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "runtime");
        assert_eq!(factory.counts(), (1, 1));
    }

    #[tokio::test]
    async fn instance_disposed_when_run_panics() {
        let factory = RecordingFactory::with(Behaviour::Panic);
        let err = engine(factory.clone())
            .run_script(&Script::new("1"), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Internal(_)), "got: {err:?}");
        assert_eq!(factory.counts(), (1, 1));
    }

    #[tokio::test]
    async fn memory_failure_does_not_poison_next_invocation() {
        let failing = RecordingFactory::with(Behaviour::ExceedMemory);
        let err = engine(failing.clone())
            .run_script(&Script::new("grow()"), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MemoryExceeded { limit_mb: 128 }));
        assert!(err.is_program_fault());

        let healthy = RecordingFactory::with(Behaviour::EchoGlobals);
        let ok = engine(healthy)
            .run_script(&Script::new("1"), &map(json!({"k": "v"})))
            .await
            .unwrap();
        assert_eq!(ok, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn invalid_module_is_rejected_before_any_instance_exists() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let module = CodeModule::new("function (x) { return x }").with_parameters(["x"]);
        let err = engine(factory.clone())
            .run_code_module(&module, &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
        assert_eq!(factory.counts(), (0, 0));
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let err = engine(factory)
            .run_script(&Script::new("   "), &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn host_context_is_copied_not_shared() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let engine = engine(factory);
        let mut context = map(json!({"list": [1, 2, 3]}));

        let first = engine.run_script(&Script::new("list"), &context).await.unwrap();
        context.insert("list".into(), json!(["mutated"]));

        assert_eq!(first, json!({"list": [1, 2, 3]}));
        assert_eq!(context["list"], json!(["mutated"]));
    }

    #[tokio::test]
    async fn every_invocation_gets_a_fresh_instance() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let engine = engine(factory.clone());
        for _ in 0..3 {
            engine.run_script(&Script::new("1"), &Map::new()).await.unwrap();
        }
        assert_eq!(factory.counts(), (3, 3));
    }

    #[tokio::test]
    async fn cancelled_caller_keeps_its_slot_until_the_instance_finishes() {
        let factory = RecordingFactory::with(Behaviour::Slow);
        let engine = SandboxEngine::new(
            factory.clone(),
            EngineConfig {
                max_concurrent: 1,
                ..Default::default()
            },
        );
        let script = Script::new("1");

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            engine.run_script(&script, &Map::new()),
        )
        .await;
        assert!(abandoned.is_err(), "slow run should outlive the caller");

        let err = engine.run_script(&script, &Map::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::ConcurrencyLimit { max: 1 }), "got: {err:?}");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while factory.counts().1 < 1 {
            assert!(std::time::Instant::now() < deadline, "abandoned instance never finished");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        // The slot is released just after disposal, on the same thread.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        engine.run_script(&script, &Map::new()).await.unwrap();
        assert_eq!(factory.counts(), (2, 2));
    }

    #[test]
    fn guard_tracks_lifecycle_and_disposes_on_drop() {
        let factory = RecordingFactory::with(Behaviour::EchoGlobals);
        let config = SandboxConfig {
            id: uuid::Uuid::new_v4(),
            resources: Default::default(),
        };
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        rt.block_on(async {
            let mut guard = InstanceGuard::acquire(factory.as_ref(), &config).unwrap();
            assert_eq!(guard.state(), SandboxState::Created);
            let globals = map(json!({"a": 1}));
            guard.inject_all(&globals).unwrap();
            assert_eq!(guard.state(), SandboxState::ContextInitialized);
            guard.compile(&Script::new("a").to_program()).unwrap();
            assert_eq!(guard.state(), SandboxState::Compiled);
            guard.run().await.unwrap();
            assert_eq!(guard.state(), SandboxState::Completed);
        });

        assert_eq!(factory.counts(), (1, 1));
    }
}

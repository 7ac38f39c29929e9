//! Engine worker thread
//!
//! The embedded engine holds process-wide scene state, so exactly one
//! thread owns it and runs jobs in arrival order. A reset by one request can
//! therefore never touch another request's scene.

use anyhow::{anyhow, Context, Result};
use bpy2obj::{
    convert, execute, ConvertError, EngineConfig, EngineError, ExecutionResult, ExportOptions,
    LuaEngine, SceneEngine,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

const UNAVAILABLE: &str = "engine worker stopped";

enum Job {
    Validate {
        script: String,
        reply: oneshot::Sender<ExecutionResult>,
    },
    Convert {
        script: String,
        options: ExportOptions,
        reply: oneshot::Sender<Result<Vec<u8>, ConvertError>>,
    },
}

#[derive(Clone)]
pub struct EngineWorker {
    tx: mpsc::UnboundedSender<Job>,
}

impl EngineWorker {
    /// Start the worker and wait until its engine is initialised
    pub fn spawn(config: EngineConfig) -> Result<Self> {
        Self::spawn_with(move || LuaEngine::new(config.clone()))
    }

    /// `build` runs on the worker thread, once at startup and again after a panic
    fn spawn_with<E, F>(build: F) -> Result<Self>
    where
        E: SceneEngine,
        F: Fn() -> Result<E, EngineError> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        // The Lua state is not Send, so it is created on the thread that uses it
        thread::Builder::new()
            .name("engine".into())
            .spawn(move || match build() {
                Ok(engine) => {
                    let _ = ready_tx.send(Ok(()));
                    run_jobs(engine, build, rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })
            .context("Failed to start engine thread")?;

        ready_rx
            .recv()
            .context("Engine thread exited during startup")?
            .map_err(|e| anyhow!("Failed to initialise engine: {}", e))?;

        info!("Embedded engine ready");
        Ok(Self { tx })
    }

    pub async fn validate(&self, script: String) -> ExecutionResult {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Job::Validate { script, reply }).is_err() {
            return ExecutionResult::failed(UNAVAILABLE);
        }
        rx.await
            .unwrap_or_else(|_| ExecutionResult::failed(UNAVAILABLE))
    }

    pub async fn convert(
        &self,
        script: String,
        options: ExportOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Convert {
                script,
                options,
                reply,
            })
            .map_err(|_| ConvertError::Unavailable(UNAVAILABLE.to_string()))?;
        rx.await
            .map_err(|_| ConvertError::Unavailable(UNAVAILABLE.to_string()))?
    }
}

fn run_jobs<E, F>(mut engine: E, build: F, mut rx: mpsc::UnboundedReceiver<Job>)
where
    E: SceneEngine,
    F: Fn() -> Result<E, EngineError>,
{
    while let Some(job) = rx.blocking_recv() {
        let outcome = catch_unwind(AssertUnwindSafe(|| match job {
            Job::Validate { script, reply } => {
                let _ = reply.send(execute(&mut engine, &script));
            }
            Job::Convert {
                script,
                options,
                reply,
            } => {
                let result = convert(&mut engine, &script, &options);
                if let Err(e) = &result {
                    warn!("Conversion failed: {}", e);
                }
                let _ = reply.send(result);
            }
        }));

        if outcome.is_err() {
            // The reply sender was dropped during unwinding; the caller sees
            // the engine as unavailable for that one request.
            error!("Engine panicked, rebuilding it");
            match build() {
                Ok(fresh) => engine = fresh,
                Err(e) => {
                    error!("Failed to rebuild engine: {}", e);
                    break;
                }
            }
        }
    }
    info!("Engine worker stopped");
}

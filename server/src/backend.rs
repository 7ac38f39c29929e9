//! The two deployments behind one interface

use crate::worker::EngineWorker;
use bpy2obj::{BlenderLauncher, ConvertError, ExecutionResult, ExportOptions};

pub enum Backend {
    /// Shared in-process engine, requests serialized on its worker thread
    Embedded(EngineWorker),
    /// Isolated Blender process per request
    Blender(BlenderLauncher),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Embedded(_) => "embedded",
            Backend::Blender(_) => "blender",
        }
    }

    pub async fn validate(&self, script: String) -> ExecutionResult {
        match self {
            Backend::Embedded(worker) => worker.validate(script).await,
            Backend::Blender(launcher) => launcher.validate(&script).await,
        }
    }

    pub async fn convert(
        &self,
        script: String,
        options: ExportOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        match self {
            Backend::Embedded(worker) => worker.convert(script, options).await,
            Backend::Blender(launcher) => launcher.convert(&script, &options).await,
        }
    }
}

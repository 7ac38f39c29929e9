//! Blender process launcher
//!
//! Each request runs in its own headless Blender process:
//! - a per-request temporary directory holds the wrapper and the export
//! - Blender is killed when the timeout expires
//! - the directory is removed on every exit path

use crate::engine::ExportOptions;
use crate::executor::ExecutionResult;
use crate::exporter::{ConvertError, OUTPUT_FILE};
use crate::normalize::normalize_script;
use crate::wrapper::{parse_report, render_wrapper, WrapperRequest};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const WRAPPER_FILE: &str = "wrapper.py";
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(100);
const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Path to the Blender executable
    pub blender_path: PathBuf,
    /// Hard limit for one Blender run
    pub timeout: Duration,
    /// Blender processes allowed at once
    pub max_concurrent: usize,
    /// Run scripts through [`normalize_script`] first
    pub normalize: bool,
    /// Parent of the per-request directories (system temp dir when unset)
    pub temp_root: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            blender_path: PathBuf::from("blender"),
            timeout: Duration::from_secs(60),
            max_concurrent: 4,
            normalize: true,
            temp_root: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Blender not found at {}", .0.display())]
    BinaryNotFound(PathBuf),
    #[error("max_concurrent must be at least 1")]
    NoCapacity,
}

/// Everything one Blender run produced
#[derive(Debug)]
struct RunOutcome {
    execution: ExecutionResult,
    export_error: Option<String>,
    artifact: Option<Vec<u8>>,
}

pub struct BlenderLauncher {
    config: LauncherConfig,
    permits: Arc<Semaphore>,
}

impl BlenderLauncher {
    /// Fails when the configured binary does not exist
    pub fn new(config: LauncherConfig) -> Result<Self, LaunchError> {
        if !config.blender_path.is_file() {
            return Err(LaunchError::BinaryNotFound(config.blender_path));
        }
        if config.max_concurrent == 0 {
            return Err(LaunchError::NoCapacity);
        }

        info!(
            "Blender launcher: {} (timeout {}s, {} concurrent)",
            config.blender_path.display(),
            config.timeout.as_secs(),
            config.max_concurrent
        );

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
        })
    }

    /// Run `script` without exporting
    pub async fn validate(&self, script: &str) -> ExecutionResult {
        match self.run(script, None).await {
            Ok(outcome) => outcome.execution,
            Err(e) => ExecutionResult::failed(e.to_string()),
        }
    }

    /// Run `script` and return the exported OBJ bytes
    pub async fn convert(
        &self,
        script: &str,
        options: &ExportOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        let outcome = self.run(script, Some(options)).await?;

        if !outcome.execution.success {
            return Err(ConvertError::Script(
                outcome.execution.error.unwrap_or_default(),
            ));
        }
        if outcome.execution.object_count == 0 {
            return Err(ConvertError::NoObjects);
        }
        if let Some(e) = outcome.export_error {
            return Err(ConvertError::Export(e));
        }
        outcome.artifact.ok_or(ConvertError::NoOutput)
    }

    async fn run(
        &self,
        script: &str,
        export: Option<&ExportOptions>,
    ) -> Result<RunOutcome, ConvertError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ConvertError::Unavailable("launcher is shut down".to_string()))?;

        let script = if self.config.normalize {
            normalize_script(script)
        } else {
            script.to_string()
        };

        // Dropping this removes the wrapper, the OBJ and any .mtl beside it
        let workdir = self.workdir().map_err(|e| ConvertError::Launch(e.to_string()))?;
        let wrapper_path = workdir.path().join(WRAPPER_FILE);
        let output_path = workdir.path().join(OUTPUT_FILE);

        let wrapper = render_wrapper(&WrapperRequest {
            script: &script,
            output_path: export.map(|_| output_path.as_path()),
            options: export.copied().unwrap_or_default(),
        })
        .map_err(|e| ConvertError::Launch(e.to_string()))?;

        tokio::fs::write(&wrapper_path, wrapper)
            .await
            .map_err(|e| ConvertError::Launch(e.to_string()))?;

        let output = self.spawn_and_wait(&wrapper_path).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("Blender exited with {}", output.status);

        let report = match parse_report(&stdout) {
            Some(report) => report,
            None if !output.status.success() => {
                return Err(ConvertError::Launch(failure_detail(&stderr, &output)));
            }
            None => {
                return Err(ConvertError::Launch(
                    "wrapper finished without reporting a result".to_string(),
                ));
            }
        };

        if !report.success {
            return Ok(RunOutcome {
                execution: ExecutionResult::failed(report.error.unwrap_or_default()),
                export_error: None,
                artifact: None,
            });
        }
        if !output.status.success() {
            return Err(ConvertError::Launch(failure_detail(&stderr, &output)));
        }

        let artifact = if export.is_some() && report.export_error.is_none() {
            match tokio::fs::read(&output_path).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(ConvertError::Export(e.to_string())),
            }
        } else {
            None
        };

        Ok(RunOutcome {
            execution: ExecutionResult::succeeded(report.objects),
            export_error: report.export_error,
            artifact,
        })
    }

    fn workdir(&self) -> io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bpy2obj-");
        match &self.config.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    fn command(&self, wrapper: &Path) -> Command {
        let mut cmd = Command::new(&self.config.blender_path);
        cmd.arg("--background")
            .arg("--factory-startup")
            .arg("--python-exit-code")
            .arg("1")
            .arg("--python")
            .arg(wrapper)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn Blender, retrying once on a transient failure
    async fn spawn(&self, wrapper: &Path) -> Result<Child, ConvertError> {
        let mut retried = false;
        loop {
            match self.command(wrapper).spawn() {
                Ok(child) => return Ok(child),
                Err(e) if !retried && is_transient(&e) => {
                    warn!("Failed to start Blender ({}), retrying once", e);
                    retried = true;
                    tokio::time::sleep(SPAWN_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(ConvertError::Launch(format!(
                        "failed to start {}: {}",
                        self.config.blender_path.display(),
                        e
                    )))
                }
            }
        }
    }

    async fn spawn_and_wait(&self, wrapper: &Path) -> Result<Output, ConvertError> {
        let child = self.spawn(wrapper).await?;

        // On timeout the child is dropped, and kill_on_drop terminates it
        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ConvertError::Launch(e.to_string())),
            Err(_) => {
                warn!(
                    "Blender exceeded {}s, killing it",
                    self.config.timeout.as_secs()
                );
                Err(ConvertError::Timeout(self.config.timeout.as_secs()))
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

fn failure_detail(stderr: &str, output: &Output) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return format!("Blender exited with {}", output.status);
    }
    let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    stderr.chars().skip(skip).collect()
}

//! Bounded out-of-process execution of the geospatial computation scripts.

use crate::config::ComputationConfig;
use crate::error::{excerpt, BaselineError, BaselineResult};
use crate::result_parser::ResultParser;
use crate::types::ComputationKind;
use serde::Serialize;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::watch;

/// Case-insensitive markers that turn diagnostic output into a failure.
const FAILURE_MARKERS: [&str; 3] = ["error:", "exception:", "traceback"];

/// Caller side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Computation side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle was dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Captured output of one finished computation process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Interpreter and script resolved for one computation kind.
#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    pub interpreter: PathBuf,
    pub script: PathBuf,
}

/// A JSON input written to a temporary file that is removed when dropped.
pub struct TempInput {
    file: NamedTempFile,
}

impl TempInput {
    pub fn write_json<T: Serialize>(
        dir: Option<&Path>,
        prefix: &str,
        value: &T,
    ) -> BaselineResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".json");
        let mut file = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        serde_json::to_writer(&mut file, value)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub struct ComputationInvoker {
    config: ComputationConfig,
}

impl ComputationInvoker {
    pub fn new(config: ComputationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComputationConfig {
        &self.config
    }

    pub fn timeout_for(&self, kind: ComputationKind) -> Duration {
        let secs = match kind {
            ComputationKind::Vegetation => self.config.vegetation_timeout_secs,
            ComputationKind::Deforestation => self.config.deforestation_timeout_secs,
            ComputationKind::CarbonBaseline => self.config.carbon_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// Verifies the interpreter and the kind's script are present.
    pub fn check_environment(&self, kind: ComputationKind) -> BaselineResult<ResolvedEnvironment> {
        let interpreter = resolve_executable(&self.config.python_bin).ok_or_else(|| {
            BaselineError::EnvironmentNotConfigured {
                detail: format!("interpreter '{}' not found", self.config.python_bin.display()),
            }
        })?;

        let script = self.config.scripts_dir.join(kind.script_name());
        match std::fs::metadata(&script) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(BaselineError::EnvironmentNotConfigured {
                    detail: format!("{} is not a regular file", script.display()),
                })
            }
            Err(e) => {
                return Err(BaselineError::EnvironmentNotConfigured {
                    detail: format!("{} is not accessible: {}", script.display(), e),
                })
            }
        }

        Ok(ResolvedEnvironment {
            interpreter,
            script,
        })
    }

    /// Runs the kind's script with `args`. No retries: on timeout the child
    /// is killed and its output discarded.
    pub async fn invoke(
        &self,
        kind: ComputationKind,
        args: &[OsString],
        cancel: &CancelToken,
    ) -> BaselineResult<ProcessOutput> {
        let env = self.check_environment(kind).map_err(|err| {
            if let BaselineError::EnvironmentNotConfigured { detail } = &err {
                tracing::error!(%kind, %detail, "geospatial computation environment missing");
            }
            err
        })?;

        if cancel.is_cancelled() {
            return Err(BaselineError::ComputationCancelled { kind });
        }

        let limit = self.timeout_for(kind);
        let started = Instant::now();
        tracing::debug!(%kind, script = %env.script.display(), "starting computation");

        let child = Command::new(&env.interpreter)
            .arg(&env.script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!(%kind, error = %e, "failed to spawn computation process");
                BaselineError::ComputationExecutionFailed {
                    kind,
                    exit_code: None,
                    excerpt: self.public_excerpt(&e.to_string()),
                }
            })?;

        let output = tokio::select! {
            result = tokio::time::timeout(limit, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    tracing::error!(%kind, error = %e, "computation process I/O failed");
                    return Err(BaselineError::ComputationExecutionFailed {
                        kind,
                        exit_code: None,
                        excerpt: self.public_excerpt(&e.to_string()),
                    });
                }
                Err(_) => {
                    tracing::error!(%kind, timeout_secs = limit.as_secs(), "computation timed out");
                    return Err(BaselineError::ComputationTimeout {
                        kind,
                        secs: limit.as_secs(),
                    });
                }
            },
            _ = cancel.cancelled() => {
                tracing::info!(%kind, "computation cancelled by caller");
                return Err(BaselineError::ComputationCancelled { kind });
            }
        };

        let output = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.classify(kind, output)
    }

    /// Applies the exit-code and diagnostic-marker rules to a finished run.
    pub fn classify(&self, kind: ComputationKind, output: ProcessOutput) -> BaselineResult<ProcessOutput> {
        let succeeded = output.exit_code == Some(0);

        if !succeeded && ResultParser::parse(&output.stdout).is_err() {
            let diagnostic = if output.stderr.trim().is_empty() {
                &output.stdout
            } else {
                &output.stderr
            };
            tracing::error!(
                %kind,
                exit_code = ?output.exit_code,
                diagnostic = %excerpt(diagnostic),
                "computation process failed"
            );
            return Err(BaselineError::ComputationExecutionFailed {
                kind,
                exit_code: output.exit_code,
                excerpt: self.public_excerpt(diagnostic),
            });
        }

        if has_failure_marker(&output.stderr) {
            tracing::error!(
                %kind,
                exit_code = ?output.exit_code,
                diagnostic = %excerpt(&output.stderr),
                "computation reported an error on its diagnostic channel"
            );
            return Err(BaselineError::ComputationRuntimeError {
                kind,
                excerpt: self.public_excerpt(&output.stderr),
            });
        }

        if !output.stderr.trim().is_empty() {
            tracing::debug!(%kind, stderr = %excerpt(&output.stderr), "computation diagnostics");
        }
        tracing::info!(%kind, duration_ms = output.duration_ms, "computation finished");
        Ok(output)
    }

    fn public_excerpt(&self, text: &str) -> Option<String> {
        self.config.expose_diagnostics.then(|| excerpt(text))
    }
}

pub fn has_failure_marker(diagnostics: &str) -> bool {
    let lowered = diagnostics.to_lowercase();
    FAILURE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn resolve_executable(name: &Path) -> Option<PathBuf> {
    if name.components().count() > 1 {
        return name.is_file().then(|| name.to_path_buf());
    }
    which::which(name).ok()
}

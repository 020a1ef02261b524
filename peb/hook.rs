//! External conversion commands run once per generated table.
//!
//! Arguments may contain `{input}` and `{output}`, replaced by the generated file
//! and the expected converted file. The command runs synchronously and is killed
//! when it outlives its timeout. Callers treat every failure as non-fatal.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

fn default_timeout_secs() -> f64 {
    60.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Extension of the converted file; without one `{output}` equals `{input}`.
    #[serde(default)]
    pub output_extension: Option<String>,
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("IO error while waiting for the external tool: {0}")]
    IoError(#[from] std::io::Error),
    #[error("'{program}' exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("'{program}' did not finish within {secs} s and was killed")]
    Timeout { program: String, secs: f64 },
    #[error("Timeout for '{program}' must be a finite number of seconds >= 0, got {secs}")]
    InvalidTimeout { program: String, secs: f64 },
}

impl ExternalTool {
    /// The timeout as a `Duration`; infinite, negative or NaN values are rejected.
    pub fn timeout(&self) -> Result<Duration, HookError> {
        Duration::try_from_secs_f64(self.timeout_secs).map_err(|_| HookError::InvalidTimeout {
            program: self.program.clone(),
            secs: self.timeout_secs,
        })
    }

    pub fn output_path(&self, input: &Path) -> PathBuf {
        match &self.output_extension {
            Some(ext) => input.with_extension(ext),
            None => input.to_path_buf(),
        }
    }

    fn expanded_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
            })
            .collect()
    }

    /// Runs the tool on `input` and returns the converted file path.
    ///
    /// Stderr is drained on its own thread while the tool runs so that a chatty
    /// tool cannot stall on a full pipe.
    pub fn run(&self, input: &Path) -> Result<PathBuf, HookError> {
        let timeout = self.timeout()?;
        let output = self.output_path(input);
        let mut child = Command::new(&self.program)
            .args(self.expanded_args(input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HookError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                // A read error only truncates the captured message.
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                child.kill()?;
                child.wait()?;
                // Descendants may still hold the pipe open; the reader is left to
                // finish on its own.
                return Err(HookError::Timeout {
                    program: self.program.clone(),
                    secs: self.timeout_secs,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        if status.success() {
            log::debug!("'{}' converted {}", self.program, input.display());
            return Ok(output);
        }

        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        Err(HookError::Exit {
            program: self.program.clone(),
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

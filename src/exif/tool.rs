use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{ExifToolError, TagMap, WriteMode};
use crate::config::ExifConfig;

/// External metadata tool.
pub trait ExifTool: Send + Sync {
    fn is_available(&self) -> bool;

    fn read_tags(&self, path: &Path) -> Result<TagMap, ExifToolError>;

    fn write_tags(&self, path: &Path, tags: &TagMap, mode: WriteMode) -> Result<(), ExifToolError>;

    /// Strip every writable tag from the file.
    fn clear_tags(&self, path: &Path) -> Result<(), ExifToolError>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// `exiftool` run as a child process, one invocation per file.
#[derive(Debug, Clone)]
pub struct ExifToolCli {
    binary: PathBuf,
    timeout: Duration,
}

struct ProcessOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: String,
}

impl ExifToolCli {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ExifConfig) -> Self {
        Self::new(&config.binary, Duration::from_secs(config.timeout_secs))
    }

    /// Run the tool, killing it once the timeout passes.
    fn run(&self, subject: &Path, args: Vec<OsString>) -> Result<ProcessOutput, ExifToolError> {
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExifToolError::Unavailable(format!("{} not found", self.binary.display()))
                } else {
                    ExifToolError::Failed {
                        path: subject.to_path_buf(),
                        reason: format!("failed to start {}: {e}", self.binary.display()),
                    }
                }
            })?;

        // Drain both pipes on their own threads so a chatty child can't block
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_end(&mut buf);
            }
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_end(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        path = ?subject,
                        seconds = self.timeout.as_secs(),
                        "exiftool timed out"
                    );
                    return Err(ExifToolError::Timeout {
                        path: subject.to_path_buf(),
                        seconds: self.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(ExifToolError::Failed {
                        path: subject.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
            }
        };

        Ok(ProcessOutput {
            success: status.success(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default())
                .trim()
                .to_string(),
        })
    }

    fn run_on_file(
        &self,
        path: &Path,
        mut args: Vec<OsString>,
    ) -> Result<ProcessOutput, ExifToolError> {
        if !path.exists() {
            return Err(ExifToolError::Failed {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }
        args.push(path.as_os_str().to_os_string());

        let output = self.run(path, args)?;
        if output.success {
            Ok(output)
        } else {
            Err(classify_failure(path, &output.stderr))
        }
    }
}

impl ExifTool for ExifToolCli {
    fn is_available(&self) -> bool {
        match self.run(&self.binary, vec!["-ver".into()]) {
            Ok(output) => output.success,
            Err(e) => {
                tracing::debug!(error = %e, "exiftool probe failed");
                false
            }
        }
    }

    fn read_tags(&self, path: &Path) -> Result<TagMap, ExifToolError> {
        let output = self.run_on_file(
            path,
            vec!["-j".into(), "-coordFormat".into(), "%f".into()],
        )?;
        parse_json_tags(path, &output.stdout)
    }

    fn write_tags(&self, path: &Path, tags: &TagMap, mode: WriteMode) -> Result<(), ExifToolError> {
        let mut args: Vec<OsString> = vec!["-overwrite_original".into()];
        if mode == WriteMode::Overwrite {
            args.push("-all=".into());
        }
        args.extend(tags.iter().map(|(tag, value)| OsString::from(format!("-{tag}={value}"))));

        self.run_on_file(path, args)?;
        tracing::debug!(path = ?path, tags = tags.len(), "Wrote EXIF tags");
        Ok(())
    }

    fn clear_tags(&self, path: &Path) -> Result<(), ExifToolError> {
        self.run_on_file(path, vec!["-overwrite_original".into(), "-all=".into()])?;
        Ok(())
    }
}

/// Map the tool's complaint onto the per-file failure taxonomy.
fn classify_failure(path: &Path, stderr: &str) -> ExifToolError {
    let lower = stderr.to_lowercase();
    let read_only = ["permission denied", "read-only", "not writable"];
    if read_only.iter().any(|marker| lower.contains(marker)) {
        ExifToolError::ReadOnly(path.to_path_buf())
    } else if lower.contains("locked") || lower.contains("being used by another process") {
        ExifToolError::FileLocked(path.to_path_buf())
    } else {
        ExifToolError::Failed {
            path: path.to_path_buf(),
            reason: if stderr.is_empty() {
                "exiftool exited with an error".to_string()
            } else {
                stderr.to_string()
            },
        }
    }
}

/// `exiftool -j` prints an array with one object per file.
fn parse_json_tags(path: &Path, stdout: &[u8]) -> Result<TagMap, ExifToolError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(TagMap::new());
    }

    let parsed: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(stdout).map_err(|e| ExifToolError::Failed {
            path: path.to_path_buf(),
            reason: format!("unreadable exiftool output: {e}"),
        })?;

    let mut tags = TagMap::new();
    if let Some(object) = parsed.into_iter().next() {
        for (key, value) in object {
            if key == "SourceFile" {
                continue;
            }
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
                serde_json::Value::Null | serde_json::Value::Object(_) => continue,
            };
            tags.insert(key, text);
        }
    }
    Ok(tags)
}

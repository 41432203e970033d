use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

pub type AnalyzeFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Runs a Terraform module analyzer over one directory and returns its raw
/// JSON report.
pub trait ModuleAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze<'a>(&'a self, module_dir: &'a Path, cancel: &'a CancellationToken) -> AnalyzeFuture<'a>;
}

const ANALYZER_TIMEOUT: Duration = Duration::from_secs(120);

/// Invokes `terraform-docs json <dir>`.
#[derive(Debug, Clone)]
pub struct TerraformDocsAnalyzer {
    binary: PathBuf,
    timeout: Duration,
}

impl TerraformDocsAnalyzer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: ANALYZER_TIMEOUT,
        }
    }

    async fn run(&self, module_dir: &Path, cancel: &CancellationToken) -> Result<String> {
        let child = Command::new(&self.binary)
            .arg("json")
            .arg(module_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::extraction(
                    format!("failed to start {}", self.binary.display()),
                    e.to_string(),
                )
            })?;

        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Err(_) => return Err(Error::extraction("analyzer timed out", "")),
                Ok(output) => output?,
            },
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::extraction(
                format!("analyzer exited with {}", output.status),
                stderr,
            ));
        }
        if !stderr.trim().is_empty() {
            debug!("terraform-docs stderr: {stderr}");
        }

        String::from_utf8(output.stdout)
            .map_err(|_| Error::extraction("analyzer output is not UTF-8", stderr))
    }
}

impl Default for TerraformDocsAnalyzer {
    fn default() -> Self {
        Self::new("terraform-docs")
    }
}

impl ModuleAnalyzer for TerraformDocsAnalyzer {
    fn name(&self) -> &str {
        "terraform-docs"
    }

    fn analyze<'a>(&'a self, module_dir: &'a Path, cancel: &'a CancellationToken) -> AnalyzeFuture<'a> {
        Box::pin(self.run(module_dir, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_binary_is_extraction_failure() {
        let temp = TempDir::new().unwrap();
        let analyzer = TerraformDocsAnalyzer::new("/nonexistent/terraform-docs");
        let err = analyzer
            .analyze(temp.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::ExtractionFailed { stderr, .. } => assert!(!stderr.is_empty()),
            other => panic!("unexpected error {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_keeps_stderr() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("fake-docs");
        std::fs::write(&script, "#!/bin/sh\necho 'boom: bad module' >&2\nexit 3\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let err = TerraformDocsAnalyzer::new(&script)
            .analyze(temp.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::ExtractionFailed { stderr, .. } => assert!(stderr.contains("boom: bad module")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_returned() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("fake-docs");
        std::fs::write(&script, "#!/bin/sh\necho '{\"inputs\": []}'\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let raw = TerraformDocsAnalyzer::new(&script)
            .analyze(temp.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(raw.trim(), "{\"inputs\": []}");
    }
}

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::logger::Logger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    File(PathBuf),
    Script(String),
    Stdin,
    Memory,
}

impl std::fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceOrigin::File(path) => write!(f, "file {}", path.display()),
            SourceOrigin::Script(script) => write!(f, "script `{}`", script),
            SourceOrigin::Stdin => write!(f, "standard input"),
            SourceOrigin::Memory => write!(f, "in-memory log"),
        }
    }
}

/// Forward-only line stream over a build log.
///
/// Reads through a fixed-capacity buffer, so only the current chunk and at
/// most one partial line are held in memory.
pub struct LineSource {
    origin: SourceOrigin,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    child: Option<Child>,
    buf: Vec<u8>,
    exhausted: bool,
}

impl LineSource {
    pub async fn open_file(path: &Path, chunk_size: usize) -> anyhow::Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open build log: {}", path.display()))?;

        Ok(Self::with_reader(
            SourceOrigin::File(path.to_path_buf()),
            BufReader::with_capacity(chunk_size, file),
            None,
        ))
    }

    pub fn spawn_script(
        shell: &str,
        script: &str,
        working_dir: &Path,
        chunk_size: usize,
    ) -> anyhow::Result<Self> {
        let mut child = Command::new(shell)
            .arg("-c")
            .arg(script)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn log script with {}", shell))?;

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture script stdout")?;

        Ok(Self::with_reader(
            SourceOrigin::Script(script.to_string()),
            BufReader::with_capacity(chunk_size, stdout),
            Some(child),
        ))
    }

    pub fn stdin(chunk_size: usize) -> Self {
        Self::with_reader(
            SourceOrigin::Stdin,
            BufReader::with_capacity(chunk_size, tokio::io::stdin()),
            None,
        )
    }

    pub fn from_reader<R>(reader: R, chunk_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::with_reader(
            SourceOrigin::Memory,
            BufReader::with_capacity(chunk_size, reader),
            None,
        )
    }

    fn with_reader<R>(origin: SourceOrigin, reader: R, child: Option<Child>) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            origin,
            reader: Box::new(reader),
            child,
            buf: Vec::new(),
            exhausted: false,
        }
    }

    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        if self.exhausted {
            return Ok(None);
        }

        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .await
            .with_context(|| format!("Failed to read from {}", self.origin))?;

        if read == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Reap a spawned script once its output is drained.
    pub async fn finish(mut self, logger: &Logger) -> anyhow::Result<()> {
        if let Some(mut child) = self.child.take() {
            let status = child
                .wait()
                .await
                .context("Failed to wait for log script")?;

            if !status.success() {
                logger.warn(&format!(
                    "Log script exited with {}",
                    status
                        .code()
                        .map(|code| format!("code {}", code))
                        .unwrap_or_else(|| "a signal".to_string())
                ));
            }
        }
        Ok(())
    }
}

//! Resolver subprocess speaking line-delimited JSON over stdio

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::ResolveError;
use crate::external::{ExternalResolver, RequestBatch, ResponseBatch};

/// Spawns the resolver command once per batch. The child is killed when the
/// call is dropped, so a timed-out call leaves no process behind.
pub struct SubprocessResolver {
    program: String,
    args: Vec<String>,
    root: PathBuf,
    name: String,
}

impl SubprocessResolver {
    pub fn new(command: &[String], root: &Path) -> Result<Self, ResolveError> {
        let (program, args) = command.split_first().ok_or(ResolveError::NotConfigured)?;
        Ok(SubprocessResolver {
            program: program.clone(),
            args: args.to_vec(),
            root: root.to_path_buf(),
            name: format!("subprocess:{}", program),
        })
    }
}

#[async_trait::async_trait]
impl ExternalResolver for SubprocessResolver {
    async fn resolve(&self, batch: &RequestBatch) -> Result<ResponseBatch, ResolveError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ResolveError::Spawn { command: self.program.clone(), source })?;

        let mut stdin = child.stdin.take().ok_or(ResolveError::NoResponse)?;
        let stdout = child.stdout.take().ok_or(ResolveError::NoResponse)?;

        let mut request = serde_json::to_string(batch)?;
        request.push('\n');
        stdin.write_all(request.as_bytes()).await?;
        stdin.flush().await?;
        drop(stdin);

        let mut line = String::new();
        let read = BufReader::new(stdout).read_line(&mut line).await?;
        if read == 0 || line.trim().is_empty() {
            return Err(ResolveError::NoResponse);
        }
        let response: ResponseBatch = serde_json::from_str(line.trim())?;
        debug!("{} answered {} of {} requests", self.name, response.results.len(), batch.requests.len());
        Ok(response)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

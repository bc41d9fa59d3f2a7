//! Subprocess-backed [`PatternExecutor`]: spawns the external `sg`
//! (ast-grep) executable, streams its line-delimited JSON output, and
//! enforces a wall-clock timeout and cancellation.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use which::which;

use super::{fingerprint, AstDump, AstNode, Match, PatternExecutor, RunOptions};
use crate::cache::{KeyFileIndex, QueryCache};
use crate::config::Language;
use crate::errors::{DedupError, PatternErrorKind, Result};
use crate::model::ValidationOutcome;

/// One JSON object as emitted by the matcher for a single match, per the
/// external interface's wire contract.
#[derive(Debug, serde::Deserialize)]
struct RawMatch {
    file: PathBuf,
    range: super::MatchRange,
    text: String,
    #[serde(default)]
    meta_vars: std::collections::HashMap<String, String>,
}

/// Concrete [`PatternExecutor`] backed by a located `sg` binary.
#[derive(Debug)]
pub struct ProcessPatternExecutor {
    binary_path: PathBuf,
    timeout: Duration,
    cache: QueryCache,
    key_index: KeyFileIndex,
}

impl ProcessPatternExecutor {
    /// Locate the `sg` executable on `PATH`. Accepts an override name for
    /// tests that stand up a fake binary under a different name.
    pub fn new(cache: QueryCache, timeout: Duration) -> Result<Self> {
        Self::with_binary_name("sg", cache, timeout)
    }

    pub fn with_binary_name(name: &str, cache: QueryCache, timeout: Duration) -> Result<Self> {
        let binary_path = which(name).map_err(|e| {
            DedupError::pattern_execution(
                PatternErrorKind::Spawn,
                format!("could not locate '{name}' on PATH: {e}"),
            )
        })?;
        Ok(Self {
            binary_path,
            timeout,
            cache,
            key_index: KeyFileIndex::default(),
        })
    }

    fn build_run_command(
        &self,
        language: Language,
        pattern: &str,
        search_roots: &[PathBuf],
        options: &RunOptions,
    ) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("run")
            .arg("--pattern")
            .arg(pattern)
            .arg("--lang")
            .arg(language.matcher_id())
            .arg("--json=stream");
        if let Some(max) = options.max_matches {
            cmd.arg("--max-matches").arg(max.to_string());
        }
        for extra in &options.extra_args {
            cmd.arg(extra);
        }
        for root in search_roots {
            cmd.arg(root);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn spawn_and_collect(&self, mut cmd: Command) -> Result<Vec<Match>> {
        let mut child = cmd.spawn().map_err(|e| {
            DedupError::pattern_execution(PatternErrorKind::Spawn, format!("failed to spawn matcher: {e}"))
        })?;

        let run = async {
            let stdout = child.stdout.take().ok_or_else(|| {
                DedupError::pattern_execution(PatternErrorKind::Spawn, "matcher stdout was not captured")
            })?;
            let mut lines = BufReader::new(stdout).lines();
            let mut matches = Vec::new();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| DedupError::io("failed reading matcher stdout", e))?
            {
                if line.trim().is_empty() {
                    continue;
                }
                let raw: RawMatch = serde_json::from_str(&line).map_err(|e| {
                    DedupError::pattern_execution(
                        PatternErrorKind::MalformedOutput,
                        format!("could not parse matcher output line: {e}"),
                    )
                })?;
                matches.push(Match {
                    file: raw.file,
                    range: raw.range,
                    text: raw.text,
                    meta_vars: raw.meta_vars,
                });
            }
            let status = child
                .wait()
                .await
                .map_err(|e| DedupError::io("failed waiting for matcher to exit", e))?;
            if !status.success() {
                return Err(DedupError::pattern_execution(
                    PatternErrorKind::NonZeroExit,
                    format!("matcher exited with {status}"),
                ));
            }
            Ok(matches)
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "pattern executor timed out, killing child");
                let _ = child.start_kill();
                Err(DedupError::pattern_execution(
                    PatternErrorKind::Timeout,
                    format!("matcher exceeded {:?} timeout", self.timeout),
                ))
            }
        }
    }
}

#[async_trait]
impl PatternExecutor for ProcessPatternExecutor {
    async fn run_pattern(
        &self,
        language: Language,
        pattern: &str,
        search_roots: &[PathBuf],
        options: &RunOptions,
    ) -> Result<Vec<Match>> {
        let key = fingerprint(language, pattern, search_roots, options)?;
        if let Some(cached) = self.cache.get(&key) {
            debug!(pattern, "query cache hit");
            return Ok(cached);
        }

        let cmd = self.build_run_command(language, pattern, search_roots, options);
        let matches = self.spawn_and_collect(cmd).await?;

        self.cache.put(key.clone(), matches.clone());
        self.key_index.record(&key, search_roots);
        Ok(matches)
    }

    async fn run_pattern_stream(
        &self,
        language: Language,
        pattern: &str,
        search_roots: &[PathBuf],
        options: &RunOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Match>> + Send>>> {
        let cmd = self.build_run_command(language, pattern, search_roots, options);
        let stream = MatchStream::spawn(cmd, self.timeout)?;
        Ok(Box::pin(stream))
    }

    async fn dump_ast(&self, language: Language, source_text: &str) -> Result<AstDump> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("dump-ast")
            .arg("--lang")
            .arg(language.matcher_id())
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            DedupError::pattern_execution(PatternErrorKind::Spawn, format!("failed to spawn matcher: {e}"))
        })?;

        use tokio::io::AsyncWriteExt;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source_text.as_bytes())
                .await
                .map_err(|e| DedupError::io("failed writing source to matcher stdin", e))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DedupError::pattern_execution(PatternErrorKind::Timeout, "dump-ast timed out"))?
            .map_err(|e| DedupError::io("failed waiting for matcher", e))?;

        if !output.status.success() {
            return Err(DedupError::pattern_execution(
                PatternErrorKind::NonZeroExit,
                format!("dump-ast exited with {}", output.status),
            ));
        }

        let nodes: Vec<AstNode> = serde_json::from_slice(&output.stdout).map_err(|e| {
            DedupError::pattern_execution(
                PatternErrorKind::MalformedOutput,
                format!("could not parse AST dump: {e}"),
            )
        })?;
        Ok(AstDump { nodes })
    }

    fn invalidate_cache_for_files(&self, files: &[PathBuf]) {
        let keys = self.key_index.keys_touching(files);
        let doomed: std::collections::HashSet<_> = keys.into_iter().collect();
        self.cache.invalidate(|k| doomed.contains(k));
    }

    async fn validate_pattern(&self, language: Language, pattern: &str) -> Result<ValidationOutcome> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("validate-pattern")
            .arg("--pattern")
            .arg(pattern)
            .arg("--lang")
            .arg(language.matcher_id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| {
            DedupError::pattern_execution(PatternErrorKind::Spawn, format!("failed to spawn matcher: {e}"))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DedupError::pattern_execution(PatternErrorKind::Timeout, "validate-pattern timed out"))?
            .map_err(|e| DedupError::io("failed waiting for matcher", e))?;

        if output.status.success() {
            Ok(ValidationOutcome {
                is_valid: true,
                errors: Vec::new(),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            Ok(ValidationOutcome {
                is_valid: false,
                errors: vec![stderr],
            })
        }
    }
}

/// Streaming wrapper over one matcher invocation. Dropping this stream
/// before it is exhausted kills the child in [`Drop`].
struct MatchStream {
    child: Child,
    lines_stream: Pin<Box<dyn Stream<Item = std::io::Result<String>> + Send>>,
    deadline: Pin<Box<tokio::time::Sleep>>,
    is_finished: bool,
}

impl MatchStream {
    fn spawn(mut cmd: Command, timeout: Duration) -> Result<Self> {
        let mut child = cmd.spawn().map_err(|e| {
            DedupError::pattern_execution(PatternErrorKind::Spawn, format!("failed to spawn matcher: {e}"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            DedupError::pattern_execution(PatternErrorKind::Spawn, "matcher stdout was not captured")
        })?;

        let reader = BufReader::new(stdout);
        let lines_stream = Box::pin(stream::unfold(reader, |mut reader| async move {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(line), reader)),
                Err(e) => Some((Err(e), reader)),
            }
        }));

        Ok(Self {
            child,
            lines_stream,
            deadline: Box::pin(tokio::time::sleep(timeout)),
            is_finished: false,
        })
    }
}

impl Stream for MatchStream {
    type Item = Result<Match>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_finished {
            return Poll::Ready(None);
        }

        if self.deadline.as_mut().poll(cx).is_ready() {
            self.is_finished = true;
            let _ = self.child.start_kill();
            return Poll::Ready(Some(Err(DedupError::pattern_execution(
                PatternErrorKind::Timeout,
                "matcher exceeded its timeout mid-stream",
            ))));
        }

        match self.lines_stream.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                self.is_finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                self.is_finished = true;
                let _ = self.child.start_kill();
                Poll::Ready(Some(Err(DedupError::io("failed reading matcher stdout", e))))
            }
            Poll::Ready(Some(Ok(line))) => {
                if line.trim().is_empty() {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                match serde_json::from_str::<RawMatch>(&line) {
                    Ok(raw) => Poll::Ready(Some(Ok(Match {
                        file: raw.file,
                        range: raw.range,
                        text: raw.text,
                        meta_vars: raw.meta_vars,
                    }))),
                    Err(e) => {
                        self.is_finished = true;
                        let _ = self.child.start_kill();
                        Poll::Ready(Some(Err(DedupError::pattern_execution(
                            PatternErrorKind::MalformedOutput,
                            format!("could not parse matcher output line: {e}"),
                        ))))
                    }
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MatchStream {
    fn drop(&mut self) {
        if !self.is_finished {
            let _ = self.child.start_kill();
        }
    }
}

use std::future::Future;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let cache = QueryCache::new(16, 1024 * 1024, 60);
        let err = ProcessPatternExecutor::with_binary_name(
            "definitely-not-a-real-matcher-binary",
            cache,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DedupError::PatternExecutionError {
                kind: PatternErrorKind::Spawn,
                ..
            }
        ));
    }

    /// `which` resolves through `PATH`, which is process-wide state; run
    /// serially so no other test's temporary `PATH` mutation is visible here.
    #[test]
    #[serial]
    fn binary_name_resolves_through_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let fake_binary = dir.path().join(if cfg!(windows) { "fake-sg.exe" } else { "fake-sg" });
        {
            let mut file = std::fs::File::create(&fake_binary).unwrap();
            file.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake_binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let original_path = std::env::var_os("PATH");
        let mut paths = vec![dir.path().to_path_buf()];
        if let Some(existing) = &original_path {
            paths.extend(std::env::split_paths(existing));
        }
        std::env::set_var("PATH", std::env::join_paths(&paths).unwrap());

        let cache = QueryCache::new(16, 1024 * 1024, 60);
        let result = ProcessPatternExecutor::with_binary_name("fake-sg", cache, Duration::from_secs(1));

        if let Some(original) = original_path {
            std::env::set_var("PATH", original);
        } else {
            std::env::remove_var("PATH");
        }

        assert!(result.is_ok());
    }
}

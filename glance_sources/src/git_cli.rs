use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use glance_source_api::{DiffSource, SourceError, SourceOutput, SourceResult};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Default limit for a whole diff computation (branch query plus diff).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on captured diff output.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

const BRANCH_OUTPUT_LIMIT: usize = 4 * 1024;
const FILTER_CONFIG_LIMIT: usize = 64 * 1024;
const STDERR_LIMIT: usize = 4 * 1024;
const REPOSITORY_MARKER: &str = ".git";

// Repository config must not be able to launch helpers or rewrite the index.
const GLOBAL_ARGS: &[&str] = &["--no-pager", "-c", "core.fsmonitor=false"];
const BRANCH_ARGS: &[&str] = &["branch", "--show-current"];
const FILTER_QUERY_ARGS: &[&str] = &["config", "-z", "--get-regexp", r"^filter\."];
const DIFF_ARGS: &[&str] = &["diff", "--no-color", "--no-ext-diff", "--no-textconv"];

/// Diff source that shells out to the git CLI with fixed, read-only arguments.
#[derive(Debug, Clone)]
pub struct GitCliSource {
    binary: OsString,
    timeout: Duration,
    max_output_bytes: usize,
    path: Option<OsString>,
    home: Option<OsString>,
}

impl GitCliSource {
    /// Construct a source that runs `git` from `PATH` with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: OsString::from("git"),
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            path: env::var_os("PATH"),
            home: env::var_os("HOME"),
        }
    }

    /// Use a specific git executable.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<OsString>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Override the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the captured output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Execution timeout applied to each run.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Output cap applied to the diff.
    #[must_use]
    pub const fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    async fn collect(&self, repository: &Path) -> SourceResult<SourceOutput> {
        let branch = self
            .capture(repository, BRANCH_ARGS, BRANCH_OUTPUT_LIMIT, Exit::Success)
            .await?;

        // Hashing a stat-dirty file runs clean filters, so every configured
        // driver is blanked for the diff invocation.
        let filters = self
            .capture(
                repository,
                FILTER_QUERY_ARGS,
                FILTER_CONFIG_LIMIT,
                Exit::SuccessOrNoMatch,
            )
            .await?;
        if filters.truncated {
            return Err(SourceError::failure("filter configuration is too large"));
        }
        let mut diff_args = disable_filters(&filter_drivers(&filters.text)?);
        diff_args.extend(DIFF_ARGS.iter().map(|arg| (*arg).to_owned()));

        let diff = self
            .capture(repository, &diff_args, self.max_output_bytes, Exit::Success)
            .await?;

        if diff.truncated {
            warn!(
                limit = self.max_output_bytes,
                "diff output exceeded cap and was truncated"
            );
        }

        Ok(SourceOutput::new(Some(branch.text), diff.text, diff.truncated))
    }

    async fn capture<S>(
        &self,
        repository: &Path,
        args: &[S],
        limit: usize,
        exit: Exit,
    ) -> SourceResult<Captured>
    where
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .arg("-C")
            .arg(repository)
            .args(GLOBAL_ARGS)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.configure_environment(&mut command);

        let mut child = command
            .spawn()
            .map_err(|err| SourceError::failure(format!("failed to spawn git: {err}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::failure("git stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SourceError::failure("git stderr was not captured"))?;

        // stderr is drained alongside stdout so a chatty child cannot stall on a full pipe.
        let (stdout_read, stderr_read) = tokio::join!(
            async {
                let read = read_capped(&mut stdout, limit).await;
                if matches!(read, Ok((_, true))) {
                    let _ = child.start_kill();
                }
                read
            },
            drain_capped(stderr, STDERR_LIMIT),
        );
        drop(stdout);

        let (mut bytes, truncated) = stdout_read
            .map_err(|err| SourceError::failure(format!("failed to read git output: {err}")))?;
        let stderr_bytes = stderr_read
            .map_err(|err| SourceError::failure(format!("failed to read git stderr: {err}")))?;
        let status = child
            .wait()
            .await
            .map_err(|err| SourceError::failure(format!("failed to reap git: {err}")))?;

        if truncated {
            cut_at_line_boundary(&mut bytes, limit);
        } else if !exit.accepts(status) {
            return Err(SourceError::failure(describe_failure(
                status,
                &stderr_bytes,
            )));
        }

        Ok(Captured {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            truncated,
        })
    }

    fn configure_environment(&self, command: &mut Command) {
        command.env_clear();
        if let Some(path) = &self.path {
            command.env("PATH", path);
        }
        if let Some(home) = &self.home {
            command.env("HOME", home);
        }
        command
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("LC_ALL", "C");
    }
}

impl Default for GitCliSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DiffSource for GitCliSource {
    fn id(&self) -> &'static str {
        "git-cli"
    }

    async fn run(&self, repository: &Path) -> SourceResult<SourceOutput> {
        if !has_repository_marker(repository) {
            debug!("refusing to run git outside a repository");
            return Err(SourceError::NotARepository);
        }

        // Dropping `collect` on expiry drops the child, which kills it.
        match tokio::time::timeout(self.timeout, self.collect(repository)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "git diff timed out; child killed");
                Err(SourceError::OperationTimeout {
                    after: self.timeout,
                })
            }
        }
    }
}

/// Exit statuses treated as success for a query.
#[derive(Debug, Clone, Copy)]
enum Exit {
    Success,
    /// `git config --get-regexp` exits 1 when nothing matches.
    SuccessOrNoMatch,
}

impl Exit {
    fn accepts(self, status: ExitStatus) -> bool {
        match self {
            Self::Success => status.success(),
            Self::SuccessOrNoMatch => status.success() || status.code() == Some(1),
        }
    }
}

#[derive(Debug)]
struct Captured {
    text: String,
    truncated: bool,
}

fn has_repository_marker(repository: &Path) -> bool {
    repository.is_dir() && repository.join(REPOSITORY_MARKER).exists()
}

/// Reads at most `limit + 1` bytes; the extra byte signals overflow.
async fn read_capped<R>(reader: &mut R, limit: usize) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut buffer = Vec::new();
    let mut limited = reader.take(cap);
    limited.read_to_end(&mut buffer).await?;
    let truncated = buffer.len() > limit;
    Ok((buffer, truncated))
}

async fn drain_capped<R>(mut reader: R, limit: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..read.min(room)]);
    }
    Ok(kept)
}

/// Driver names from `git config -z --get-regexp` output.
///
/// Entries are `key\nvalue\0`; a key is `filter.<name>.<variable>` where the
/// name may itself contain dots.
fn filter_drivers(config: &str) -> SourceResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for entry in config.split('\0').filter(|entry| !entry.is_empty()) {
        let key = entry.split_once('\n').map_or(entry, |(key, _)| key);
        let Some(name) = key
            .strip_prefix("filter.")
            .and_then(|rest| rest.rsplit_once('.'))
            .map(|(name, _)| name)
        else {
            continue;
        };
        if name.contains('=') || name.contains('\n') {
            return Err(SourceError::failure(
                "repository configures a filter driver that cannot be disabled",
            ));
        }
        if !names.iter().any(|known| known == name) {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}

/// `-c` overrides that leave each driver with empty commands. Git skips
/// empty filter commands and `required=false` keeps that from failing.
fn disable_filters(names: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(names.len() * 8);
    for name in names {
        for setting in ["clean=", "smudge=", "process=", "required=false"] {
            args.push("-c".to_owned());
            args.push(format!("filter.{name}.{setting}"));
        }
    }
    args
}

fn cut_at_line_boundary(buffer: &mut Vec<u8>, limit: usize) {
    buffer.truncate(limit);
    if let Some(newline) = buffer.iter().rposition(|byte| *byte == b'\n') {
        buffer.truncate(newline + 1);
    }
}

fn describe_failure(status: ExitStatus, stderr: &[u8]) -> String {
    let code = status
        .code()
        .map_or_else(|| "terminated".to_string(), |c| c.to_string());
    let stderr = String::from_utf8_lossy(stderr);
    let first_line = stderr.lines().next().unwrap_or_default().trim();
    format!("git exited with status {code}: {first_line}")
}

//! Command line and environment configuration, read once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use glance_core::guard::{PathGuard, RootsFile};
use glance_core::service::{DiffService, ServiceLimits};
use glance_core::sources::GitCliSource;
use glance_core::token::{Secret, TokenCodec, MIN_SECRET_LEN};

/// Remote, read-only git diff viewer.
#[derive(Parser, Debug)]
#[command(name = "glance", version, about = "Serve read-only git diffs behind signed links")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Mint a token (or viewer link) for a repository.
    Issue(IssueArgs),
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// HMAC secret used to sign tokens.
    #[arg(long, env = "GLANCE_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Directory under which repositories may be viewed. Repeatable.
    #[arg(
        long = "approved-root",
        env = "GLANCE_APPROVED_ROOTS",
        value_delimiter = ',',
        required_unless_present = "roots_file",
        conflicts_with = "roots_file"
    )]
    pub approved_roots: Vec<PathBuf>,

    /// File listing approved roots, one per line; re-read on every request.
    #[arg(long, env = "GLANCE_ROOTS_FILE")]
    pub roots_file: Option<PathBuf>,

    /// Lifetime of issued tokens, in seconds.
    #[arg(long, env = "GLANCE_TOKEN_TTL_SECS", default_value_t = 3600)]
    pub token_ttl_secs: u64,

    /// Upper bound on token lifetime, in seconds.
    #[arg(long, env = "GLANCE_MAX_TOKEN_TTL_SECS", default_value_t = 86_400)]
    pub max_token_ttl_secs: u64,
}

impl CommonArgs {
    /// Token codec for the configured secret and lifetimes.
    ///
    /// # Errors
    ///
    /// Fails when the secret is shorter than [`MIN_SECRET_LEN`] bytes or
    /// either lifetime is zero.
    pub fn codec(&self) -> Result<TokenCodec> {
        let secret = Secret::new(self.secret.as_bytes());
        if !secret.is_strong() {
            bail!("secret must be at least {MIN_SECRET_LEN} bytes");
        }
        if self.token_ttl_secs == 0 {
            bail!("token lifetime must be at least one second");
        }
        if self.max_token_ttl_secs == 0 {
            bail!("maximum token lifetime must be at least one second");
        }
        Ok(TokenCodec::new(secret)
            .with_default_ttl(Duration::from_secs(self.token_ttl_secs))
            .with_max_ttl(Duration::from_secs(self.max_token_ttl_secs)))
    }

    /// Guard over the configured roots, live from the roots file when one is set.
    pub fn guard(&self) -> PathGuard {
        match &self.roots_file {
            Some(file) => PathGuard::from_source(Arc::new(RootsFile::new(file))),
            None => PathGuard::new(self.approved_roots.iter().cloned()),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Address to listen on.
    #[arg(long, env = "GLANCE_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Cap on diff output; larger diffs are truncated.
    #[arg(long, env = "GLANCE_MAX_DIFF_BYTES", default_value_t = 2 * 1024 * 1024)]
    pub max_diff_bytes: usize,

    /// Time limit for one diff, in seconds.
    #[arg(long, env = "GLANCE_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Diffs allowed to run at once.
    #[arg(long, env = "GLANCE_MAX_CONCURRENT", default_value_t = 4)]
    pub max_concurrent: usize,

    /// How long a request waits for a diff slot, in milliseconds.
    #[arg(long, env = "GLANCE_ADMISSION_WAIT_MS", default_value_t = 2000)]
    pub admission_wait_ms: u64,

    /// Git executable.
    #[arg(long, env = "GLANCE_GIT_BINARY", default_value = "git")]
    pub git_binary: PathBuf,

    /// Origin allowed to call the API. Repeatable; `*` allows any.
    #[arg(
        long = "allowed-origin",
        env = "GLANCE_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "https://web.telegram.org"
    )]
    pub allowed_origins: Vec<String>,

    /// Static viewer bundle; its `diff-viewer/` page is served at `/diff-viewer/`.
    #[arg(long, env = "GLANCE_WEBAPP_DIR")]
    pub webapp_dir: Option<PathBuf>,
}

impl ServeArgs {
    /// Diff service wired to the git CLI.
    ///
    /// # Errors
    ///
    /// See [`CommonArgs::codec`]; also fails when the timeout is zero.
    pub fn build_service(&self) -> Result<DiffService> {
        if self.timeout_secs == 0 {
            bail!("diff timeout must be at least one second");
        }
        let source = GitCliSource::new()
            .with_binary(&self.git_binary)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_output_bytes(self.max_diff_bytes);
        Ok(DiffService::with_limits(
            self.common.codec()?,
            self.common.guard(),
            Arc::new(source),
            self.limits(),
        ))
    }

    /// Admission limits from the flags.
    pub const fn limits(&self) -> ServiceLimits {
        ServiceLimits {
            max_concurrent: self.max_concurrent,
            admission_wait: Duration::from_millis(self.admission_wait_ms),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IssueArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Repository to link.
    pub path: PathBuf,

    /// Public URL of the viewer; prints a full link instead of a bare token.
    #[arg(long, env = "GLANCE_BASE_URL")]
    pub base_url: Option<String>,
}

impl IssueArgs {
    /// Service used only for issuing; it never runs a diff.
    ///
    /// # Errors
    ///
    /// See [`CommonArgs::codec`].
    pub fn build_service(&self) -> Result<DiffService> {
        Ok(DiffService::new(
            self.common.codec()?,
            self.common.guard(),
            Arc::new(GitCliSource::new()),
        ))
    }

    /// Token or viewer link to print for `token`.
    pub fn render(&self, token: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/diff-viewer/?token={token}", base.trim_end_matches('/')),
            None => token.to_owned(),
        }
    }
}

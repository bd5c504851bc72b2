//! Glance: read-only git diffs behind signed, expiring links.
//!
//! Usage:
//!     glance serve --secret <SECRET> --approved-root /srv/repos
//!     glance issue --secret <SECRET> --approved-root /srv/repos /srv/repos/proj

use anyhow::{Context, Result};
use clap::Parser;
use glance_server::config::{Cli, Command, IssueArgs, ServeArgs};
use glance_server::{cors_layer, logging, router, with_viewer};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Issue(args) => issue(&args),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let service = args.build_service()?;
    let cors = cors_layer(&args.allowed_origins)?;

    tracing::info!("Starting Glance diff server");
    tracing::info!("  Bind: {}", args.bind);
    match &args.common.roots_file {
        Some(file) => tracing::info!("  Approved roots file: {}", file.display()),
        None => {
            for root in &args.common.approved_roots {
                tracing::info!("  Approved root: {}", root.display());
            }
        }
    }
    tracing::info!(
        "  Limits: {} concurrent, {} ms admission wait, {} s timeout, {} byte cap",
        args.max_concurrent,
        args.admission_wait_ms,
        args.timeout_secs,
        args.max_diff_bytes
    );
    tracing::info!("  Allowed origins: {}", args.allowed_origins.join(", "));

    let mut app = router(service, cors);
    match &args.webapp_dir {
        Some(dir) => {
            tracing::info!("  Viewer: {}", dir.display());
            app = with_viewer(app, dir);
        }
        None => tracing::info!("  Viewer: not configured"),
    }

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;

    tracing::info!("Glance stopped");
    Ok(())
}

fn issue(args: &IssueArgs) -> Result<()> {
    let service = args.build_service()?;
    let token = service
        .issue_token(&args.path)
        .with_context(|| format!("cannot link {}", args.path.display()))?;
    println!("{}", args.render(&token));
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

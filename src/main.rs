mod bundle;
mod config;
mod db;
mod import;
mod ipc;
mod password;
mod progress;
mod roster;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = config::Config::parse();

    // stdout carries responses; logs go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        config: config.clone(),
    };
    if let Some(path) = config.workspace.as_ref() {
        let conn = db::open_db(path)?;
        tracing::info!(workspace = %path.display(), "workspace opened");
        state.workspace = Some(path.clone());
        state.db = Some(conn);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "classtrackd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                // No id to echo back.
                ipc::err("", "bad_json", e.to_string(), None)
            }
        };

        let out = serde_json::to_string(&resp)?;
        writeln!(stdout, "{}", out)?;
        stdout.flush()?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

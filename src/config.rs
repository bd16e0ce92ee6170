use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "classtrackd")]
#[command(version, about = "Class submission tracking sidecar (JSON lines over stdio)", long_about = None)]
pub struct Config {
    /// Workspace directory to open at startup; `workspace.select` can switch it later
    #[arg(long, env = "CLASSTRACK_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Password given to students created by bulk import
    #[arg(
        long,
        env = "CLASSTRACK_DEFAULT_PASSWORD",
        default_value = "changeme",
        hide_env_values = true
    )]
    pub default_password: String,

    /// Log filter directive used when RUST_LOG is unset
    #[arg(long, env = "CLASSTRACK_LOG", default_value = "info")]
    pub log_filter: String,
}

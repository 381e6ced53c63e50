use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments, each backed by an environment variable so the
/// server can be configured either way.
#[derive(Parser, Debug)]
#[command(name = "judged", version, about, long_about = None)]
pub struct CliArgs {
    /// Shared authentication token checked on every route except /health.
    ///
    /// When unset the server still starts, but authenticated routes answer
    /// with 500 until a token is configured.
    #[arg(long, env = "JUDGE_TOKEN")]
    pub token: Option<String>,

    /// Port to listen on
    #[arg(long, env = "JUDGE_PORT", default_value_t = 3235)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "JUDGE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Number of concurrent judge workers (>= 1)
    #[arg(long, env = "JUDGE_THREADS", default_value_t = 1)]
    pub threads: usize,

    /// Logger verbosity (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Root directory of the artifact cache (treated as scratch space)
    #[arg(long, env = "JUDGE_CACHE_DIR", default_value = "/tmp/judge-cache")]
    pub cache_root: PathBuf,

    /// Directory holding the vendored built-in checker sources
    #[arg(long, env = "JUDGE_CHECKER_DIR", default_value = "checkers")]
    pub checker_dir: PathBuf,
}

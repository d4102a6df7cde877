use clap::Parser;
use std::path::PathBuf;

/// Iris - gateway synchronization and cache-consistency service
#[derive(Parser, Debug, Clone)]
#[command(name = "iris", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "IRIS_CONFIG", default_value = "iris.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "IRIS_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "IRIS_PORT")]
    pub port: Option<u16>,

    /// Gateway endpoint URL
    #[arg(long, env = "IRIS_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Database connection URL
    #[arg(long, env = "IRIS_DATABASE_URL")]
    pub database_url: Option<String>,
}

use std::path::PathBuf;

use clap::Parser;

/// UltrAI orchestration service
#[derive(Debug, Parser)]
#[command(name = "ultrai", about = "Multi-provider LLM synthesis pipeline")]
pub struct Args {
    /// Path to configuration file; environment variables apply on top
    #[arg(short, long, env = "ULTRAI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, env = "ULTRAI_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,
}

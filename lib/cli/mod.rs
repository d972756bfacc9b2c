use crate::build_info;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    about = "Dataset ingestion service with transform-status polling",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[clap(long)]
    /// Address for the HTTP API (overrides LISTEN_ADDR)
    pub listen_addr: Option<SocketAddr>,

    #[clap(long)]
    /// Filesystem artifact store root (overrides STORAGE_DIR)
    pub storage_dir: Option<PathBuf>,

    #[clap(long)]
    /// Number of concurrent poll workers (overrides POOL_SIZE)
    pub pool_size: Option<usize>,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

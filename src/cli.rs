use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the daemon.
#[derive(Debug, Parser)]
#[command(
    name = "tunneld",
    version,
    about = "Unattended SSH tunnel daemon: keeps configured port forwards alive across failures"
)]
pub struct Args {
    /// Path to the JSON tunnel configuration (falls back to TUNNELD_CONFIG_PATH)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

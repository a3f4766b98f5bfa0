use std::path::PathBuf;

use clap::Parser;

/// muxgated — config-driven multi-protocol reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "muxgated", version)]
pub struct Args {
    /// Path to the YAML configuration file. The file is watched and
    /// reconciled on change.
    pub config: PathBuf,
}

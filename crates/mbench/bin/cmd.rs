pub mod notes;
pub mod reset;
pub mod show;

use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Args)]
pub struct TableArgs {
    #[arg(
        long,
        default_value = mbench::DEFAULT_CSV_PATH,
        help = "Path of the CSV profile table"
    )]
    pub csv: PathBuf,
}

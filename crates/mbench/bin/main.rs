mod cmd;
use clap::{Parser, Subcommand};
use cmd::notes::NotesArgs;
use cmd::reset::ResetArgs;
use cmd::show::ShowArgs;
use eyre::Result;

#[derive(Subcommand, Debug)]
pub enum MbSubcommand {
    #[command(about = "Print the aggregated profiles stored in a CSV table")]
    Show(ShowArgs),
    #[command(about = "Attach a note to a profiled function")]
    Notes(NotesArgs),
    #[command(about = "Drop one profiled function, or every profile, from a CSV table")]
    Reset(ResetArgs),
}

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "mbench CLI: inspect and edit the profile tables written by instrumented programs

Set MBENCH_LOG to control diagnostics (default: warn)."
)]
pub struct MbArgs {
    #[command(subcommand)]
    pub cmd: MbSubcommand,
}

fn main() -> Result<()> {
    init_logging();
    let root_args = MbArgs::parse();

    match root_args.cmd {
        MbSubcommand::Show(args) => {
            args.run()?;
        }
        MbSubcommand::Notes(args) => {
            args.run()?;
        }
        MbSubcommand::Reset(args) => {
            args.run()?;
        }
    }

    Ok(())
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env("MBENCH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

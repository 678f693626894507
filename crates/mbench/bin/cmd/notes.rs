use clap::Parser;
use eyre::{bail, Result};
use mbench::AggregateStore;

use super::TableArgs;

#[derive(Debug, Parser)]
pub struct NotesArgs {
    #[arg(help = "Fully qualified function name, as stored in the table")]
    pub function: String,

    #[arg(help = "Note text; an empty string clears the note")]
    pub text: String,

    #[command(flatten)]
    pub table: TableArgs,
}

impl NotesArgs {
    pub fn run(&self) -> Result<()> {
        let mut store = AggregateStore::from_path(&self.table.csv)?;
        // Notes are the last column; a newline would split the row.
        let text = self.text.replace(['\n', '\r'], " ");

        if !store.set_notes(&self.function, text) {
            bail!(
                "no profile named {:?} in {}",
                self.function,
                self.table.csv.display()
            );
        }

        store.save(&self.table.csv)?;
        tracing::debug!("updated notes of {}", self.function);
        Ok(())
    }
}

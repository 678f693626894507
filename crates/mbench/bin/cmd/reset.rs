use clap::Parser;
use eyre::{bail, Result};
use mbench::AggregateStore;

use super::TableArgs;

#[derive(Debug, Parser)]
pub struct ResetArgs {
    #[arg(help = "Function to drop; every profile is dropped when omitted")]
    pub function: Option<String>,

    #[command(flatten)]
    pub table: TableArgs,
}

impl ResetArgs {
    pub fn run(&self) -> Result<()> {
        let mut store = AggregateStore::from_path(&self.table.csv)?;

        match &self.function {
            Some(function) => {
                if store.remove(function).is_none() {
                    bail!(
                        "no profile named {:?} in {}",
                        function,
                        self.table.csv.display()
                    );
                }
            }
            None => store.clear(),
        }

        store.save(&self.table.csv)?;
        println!("{} profiles left in {}", store.len(), self.table.csv.display());
        Ok(())
    }
}

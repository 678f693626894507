use clap::{Parser, ValueEnum};
use eyre::Result;
use mbench::{AggregateStore, SummaryJson, SummaryRow};

use super::TableArgs;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortKey {
    Time,
    Calls,
    Cpu,
    Memory,
    Io,
    Name,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[arg(long, value_enum, default_value_t = SortKey::Time, help = "Column to sort by, largest first")]
    pub sort: SortKey,

    #[arg(long, default_value_t = 0, help = "Maximum number of functions to show (0 = all)")]
    pub limit: usize,

    #[arg(long, help = "Print the summary as JSON")]
    pub json: bool,
}

impl ShowArgs {
    pub fn run(&self) -> Result<()> {
        let store = AggregateStore::from_path(&self.table.csv)?;
        if store.is_empty() {
            tracing::info!("no profiles in {}", self.table.csv.display());
        }

        let mut rows = store.summary_json().rows;
        sort_rows(&mut rows, self.sort);
        if self.limit > 0 {
            rows.truncate(self.limit);
        }
        let summary = SummaryJson { rows };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            mbench::print_rows(&summary);
        }

        Ok(())
    }
}

fn sort_rows(rows: &mut [SummaryRow], key: SortKey) {
    let descending = |a: f64, b: f64| b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal);
    match key {
        SortKey::Time => rows.sort_by(|a, b| descending(a.total_time, b.total_time)),
        SortKey::Calls => rows.sort_by(|a, b| b.calls.cmp(&a.calls)),
        SortKey::Cpu => rows.sort_by(|a, b| descending(a.total_cpu, b.total_cpu)),
        SortKey::Memory => rows.sort_by(|a, b| b.total_memory.cmp(&a.total_memory)),
        SortKey::Io => rows.sort_by(|a, b| b.total_io.cmp(&a.total_io)),
        SortKey::Name => rows.sort_by(|a, b| a.function.cmp(&b.function)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbench::Deltas;
    use std::time::Duration;

    fn rows() -> Vec<SummaryRow> {
        let mut store = AggregateStore::new();
        let deltas = |secs: u64, io: i64| Deltas {
            elapsed: Duration::from_secs(secs),
            io,
            ..Deltas::default()
        };
        store.update("b_slow", &deltas(3, 10));
        store.update("a_busy", &deltas(1, 500));
        store.update("a_busy", &deltas(1, 500));
        store.summary_json().rows
    }

    fn names(rows: &[SummaryRow]) -> Vec<&str> {
        rows.iter().map(|r| r.function.as_str()).collect()
    }

    #[test]
    fn test_sort_rows() {
        let mut rows = rows();
        sort_rows(&mut rows, SortKey::Time);
        assert_eq!(names(&rows), ["b_slow", "a_busy"]);
        sort_rows(&mut rows, SortKey::Calls);
        assert_eq!(names(&rows), ["a_busy", "b_slow"]);
        sort_rows(&mut rows, SortKey::Io);
        assert_eq!(names(&rows), ["a_busy", "b_slow"]);
        sort_rows(&mut rows, SortKey::Name);
        assert_eq!(names(&rows), ["a_busy", "b_slow"]);
    }
}

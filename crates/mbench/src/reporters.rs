use crate::output::{
    format_duration, format_signed_bytes, shorten_function_name, Format, ProfileRecord, Reporter,
    SummaryJson, SummaryRow,
};
use colored::*;
use prettytable::{color, Attr, Cell, Row, Table};

pub(crate) fn for_format(format: Format) -> Box<dyn Reporter> {
    match format {
        Format::Table => Box::new(TableReporter),
        Format::Json => Box::new(JsonReporter),
        Format::JsonPretty => Box::new(JsonPrettyReporter),
    }
}

const SUMMARY_HEADERS: [&str; 9] = [
    "Function",
    "Calls",
    "Total Time",
    "Avg Time",
    "Avg CPU",
    "Avg Memory",
    "Avg GPU",
    "Avg IO",
    "Notes",
];

/// Rows ordered by total time, longest first.
pub fn sorted_rows(summary: &SummaryJson) -> Vec<&SummaryRow> {
    let mut rows: Vec<&SummaryRow> = summary.rows.iter().collect();
    rows.sort_by(|a, b| {
        b.total_time
            .partial_cmp(&a.total_time)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.function.cmp(&b.function))
    });
    rows
}

pub(crate) fn display_record(record: &ProfileRecord) {
    let name = shorten_function_name(&record.name);
    println!(
        "{} {} {} | cpu {} | mem {} | gpu {} | io {}",
        "[mbench]".blue().bold(),
        name.as_str().yellow().bold(),
        format_duration(record.duration).as_str().green(),
        format_duration(record.cpu_usage),
        format_signed_bytes(record.mem_usage),
        format_signed_bytes(record.gpu_usage),
        format_signed_bytes(record.io_usage),
    );
    if record.calls > 1 {
        println!(
            "         avg over {} calls: {} | cpu {} | mem {} | gpu {} | io {}",
            record.calls,
            format_duration(record.avg_time),
            format_duration(record.avg_cpu),
            format_signed_bytes(record.avg_memory),
            format_signed_bytes(record.avg_gpu),
            format_signed_bytes(record.avg_io),
        );
    }
}

/// Prints the summary table, longest total time first.
pub fn display_table(summary: &SummaryJson) {
    render_table(sorted_rows(summary));
}

/// Prints the summary table keeping the row order of `summary`.
pub fn print_rows(summary: &SummaryJson) {
    render_table(summary.rows.iter().collect());
}

fn render_table(rows: Vec<&SummaryRow>) {
    let use_colors = std::env::var("NO_COLOR").is_err();

    if rows.is_empty() {
        println!("{} No measurements recorded.", "[mbench]".blue().bold());
        return;
    }

    let mut table = Table::new();

    let header_cells: Vec<Cell> = SUMMARY_HEADERS
        .iter()
        .map(|header| {
            if use_colors {
                Cell::new(header)
                    .with_style(Attr::Bold)
                    .with_style(Attr::ForegroundColor(color::CYAN))
            } else {
                Cell::new(header).with_style(Attr::Bold)
            }
        })
        .collect();
    table.add_row(Row::new(header_cells));

    for row in &rows {
        table.add_row(Row::new(vec![
            Cell::new(&shorten_function_name(&row.function)),
            Cell::new(&row.calls.to_string()),
            Cell::new(&format_duration(row.total_time)),
            Cell::new(&format_duration(row.avg_time)),
            Cell::new(&format_duration(row.avg_cpu)),
            Cell::new(&format_signed_bytes(row.avg_memory)),
            Cell::new(&format_signed_bytes(row.avg_gpu)),
            Cell::new(&format_signed_bytes(row.avg_io)),
            Cell::new(&row.notes),
        ]));
    }

    println!(
        "{} summary - {} functions",
        "[mbench]".blue().bold(),
        rows.len()
    );
    table.printstd();
}

/// Human-readable console output (default).
pub struct TableReporter;

impl Reporter for TableReporter {
    fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>> {
        display_record(record);
        Ok(())
    }

    fn report_summary(&self, summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>> {
        display_table(summary);
        Ok(())
    }
}

/// One compact JSON object per line.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string(record)?);
        Ok(())
    }

    fn report_summary(&self, summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string(summary)?);
        Ok(())
    }
}

pub struct JsonPrettyReporter;

impl Reporter for JsonPrettyReporter {
    fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(record)?);
        Ok(())
    }

    fn report_summary(&self, summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(summary)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(function: &str, total_time: f64) -> SummaryRow {
        SummaryRow {
            function: function.to_string(),
            calls: 1,
            total_time,
            total_cpu: 0.0,
            total_memory: 0,
            total_gpu: 0,
            total_io: 0,
            avg_time: total_time,
            avg_cpu: 0.0,
            avg_memory: 0.0,
            avg_gpu: 0.0,
            avg_io: 0.0,
            notes: String::new(),
        }
    }

    #[test]
    fn test_rows_sorted_by_total_time() {
        let summary = SummaryJson {
            rows: vec![row("fast", 0.1), row("slow", 2.0), row("also_fast", 0.1)],
        };
        let names: Vec<_> = sorted_rows(&summary)
            .into_iter()
            .map(|r| r.function.as_str())
            .collect();
        assert_eq!(names, ["slow", "also_fast", "fast"]);
    }

    #[test]
    fn test_summary_json_roundtrip() {
        let summary = SummaryJson {
            rows: vec![row("work", 1.25)],
        };
        let text = serde_json::to_string(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["rows"][0]["function"], "work");
        assert_eq!(value["rows"][0]["total_time"], 1.25);

        let back: SummaryJson = serde_json::from_str(&text).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_builtin_reporters_accept_records() {
        let summary = SummaryJson {
            rows: vec![row("work", 1.0)],
        };
        for format in [Format::Table, Format::Json, Format::JsonPretty] {
            let reporter = for_format(format);
            assert!(reporter.report_summary(&summary).is_ok());
            assert!(reporter.report_summary(&SummaryJson::default()).is_ok());
        }
    }
}

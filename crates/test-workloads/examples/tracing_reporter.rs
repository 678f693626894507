use std::time::Duration;

use mbench::{ProfileRecord, ProfilerBuilder, Reporter, SummaryJson};
use tracing::{info, info_span};

// cargo run -p test-workloads --example tracing_reporter

#[mbench::profile]
fn sync_function(sleep: u64) {
    let vec = vec![1, 2, 3, 5, 6, 7, 8, 9, 10];
    std::hint::black_box(&vec);
    std::thread::sleep(Duration::from_micros(sleep));
}

struct TracingReporter;

impl Reporter for TracingReporter {
    fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>> {
        let span = info_span!("call", function = %record.name);
        let _enter = span.enter();
        info!(
            duration = record.duration,
            cpu = record.cpu_usage,
            memory = record.mem_usage,
            io = record.io_usage,
            calls = record.calls
        );
        Ok(())
    }

    fn report_summary(&self, summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>> {
        info!("{} functions measured", summary.rows.len());
        for row in mbench::sorted_rows(summary) {
            let span = info_span!("summary", function = %row.function);
            let _enter = span.enter();
            info!(calls = row.calls, total_time = row.total_time, avg_time = row.avg_time);
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let profiler = mbench::init(
        ProfilerBuilder::from_env()
            .enabled(true)
            .summary(true)
            .reporter(Box::new(TracingReporter)),
    )?;
    let _session = profiler.session();

    for i in 0..20 {
        sync_function(i * 10);

        mbench::profile_block!("custom_block", {
            std::thread::sleep(Duration::from_micros(i * 3))
        });
    }

    Ok(())
}

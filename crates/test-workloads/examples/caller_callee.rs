// MBENCH=1 cargo run -p test-workloads --example caller_callee
// MBENCH=1 MBENCH_MODE=callee cargo run -p test-workloads --example caller_callee

mod db {
    #[mbench::track]
    pub fn query(rows: usize) -> Vec<u64> {
        (0..rows as u64).map(decode).collect()
    }

    #[mbench::track]
    fn decode(raw: u64) -> u64 {
        raw.rotate_left(7)
    }
}

#[mbench::track]
fn handler() -> usize {
    db::query(1_000).len()
}

fn main() {
    let mode = match std::env::var("MBENCH_MODE").as_deref() {
        Ok("callee") => mbench::Mode::Callee,
        _ => mbench::Mode::Caller,
    };

    // caller: calls made from this module (handler, and db::query from handler)
    // callee: only functions defined in this module (handler)
    mbench::profileme!(mode);

    for _ in 0..10 {
        std::hint::black_box(handler());
    }
    std::hint::black_box(db::query(10));

    mbench::global().report_summary();
    if let Err(e) = mbench::shutdown() {
        eprintln!("{e}");
    }
}

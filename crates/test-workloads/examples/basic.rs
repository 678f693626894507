use std::time::Duration;

// MBENCH=1 cargo run -p test-workloads --example basic

#[mbench::profile]
fn allocate(len: usize) -> usize {
    let buffer = vec![7u8; len];
    std::hint::black_box(&buffer);
    buffer.len()
}

#[mbench::profile(min_duration_ms = 20)]
fn slow_step(millis: u64) {
    std::thread::sleep(Duration::from_millis(millis));
}

#[mbench::profile(summary)]
fn epoch(i: u64) -> u64 {
    (0..10_000u64).map(|n| n ^ i).sum()
}

#[mbench::main(csv = "target/mbench_basic.csv")]
fn main() {
    for i in 0..5 {
        allocate(1 << (16 + i));
        slow_step(i * 10);
        std::hint::black_box(epoch(i));
    }

    mbench::profile_block!("custom_block", {
        std::thread::sleep(Duration::from_millis(5))
    });

    let quiet = mbench::profiling("quiet_block")
        .quiet(true)
        .start()
        .finish();
    if let Some(deltas) = quiet {
        println!("quiet_block took {:?}", deltas.elapsed);
    }
}

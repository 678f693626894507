use std::time::Duration;

// MBENCH=1 cargo run -p test-workloads --example async_main

#[mbench::profile]
async fn fetch(delay: u64) -> Vec<u8> {
    tokio::time::sleep(Duration::from_millis(delay)).await;
    vec![0u8; 4096]
}

#[mbench::profile(name = "decode_payload")]
fn decode(payload: &[u8]) -> usize {
    payload.iter().filter(|b| **b == 0).count()
}

#[tokio::main(flavor = "current_thread")]
#[mbench::main(format = "json-pretty", summary)]
async fn main() {
    for i in 1..=5 {
        let payload = fetch(i * 5).await;
        std::hint::black_box(decode(&payload));
    }
}

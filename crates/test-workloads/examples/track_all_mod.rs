// MBENCH=1 MBENCH_SUMMARY=1 cargo run -p test-workloads --example track_all_mod

#[mbench::track_all]
mod tracked_module {
    use std::time::Duration;

    pub fn sync_function_one(sleep: u64) {
        let vec = vec![1, 2, 3, 4, 5];
        std::hint::black_box(&vec);
        drop(vec);
        std::thread::sleep(Duration::from_micros(sleep));
    }

    #[mbench::skip]
    pub fn sync_function_two(sleep: u64) {
        let vec = vec![6, 7, 8, 9, 10];
        std::hint::black_box(&vec);
        drop(vec);
        std::thread::sleep(Duration::from_micros(sleep * 2));
    }
}

struct Parser {
    parsed: usize,
}

#[mbench::track_all]
impl Parser {
    fn parse(&mut self, input: &str) -> usize {
        self.parsed += input.split_whitespace().count();
        self.parsed
    }

    #[mbench::skip]
    fn parsed(&self) -> usize {
        self.parsed
    }
}

#[mbench::main]
fn main() {
    mbench::profileme(module_path!(), mbench::Mode::All);

    let mut parser = Parser { parsed: 0 };
    for i in 1..=50 {
        tracked_module::sync_function_one(i);
        tracked_module::sync_function_two(i);
        parser.parse("one two three");
    }
    println!("parsed {} words", parser.parsed());
}

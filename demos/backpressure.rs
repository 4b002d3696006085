use lazy_react::{Queue, WaitStrategy};
use std::{
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
struct Opts {
    #[structopt(long, default_value = "10000")]
    pub num_items: usize,
    #[structopt(long, default_value = "16")]
    pub capacity: usize,
    #[structopt(long, default_value = "100")]
    pub consumer_delay_us: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opts = Opts::from_args();

    for strategy in [
        WaitStrategy::Block,
        WaitStrategy::Spin,
        WaitStrategy::Yield,
        WaitStrategy::Backoff,
    ] {
        let queue = Queue::<usize>::builder()
            .capacity(opts.capacity)
            .producer_wait(strategy)
            .consumer_wait(strategy)
            .size_signal(true)
            .build();
        let signal = queue.size_signal().expect("size signal is enabled");

        let since = Instant::now();
        let producer = {
            let queue = queue.clone();
            let num_items = opts.num_items;
            thread::spawn(move || {
                queue.offer_all(0..num_items).expect("queue closed early");
                queue.close();
            })
        };

        let delay = Duration::from_micros(opts.consumer_delay_us);
        let mut peak = 0;
        let mut count = 0;
        for _ in queue.iter() {
            peak = peak.max(*signal.borrow());
            count += 1;
            thread::sleep(delay);
        }
        producer.join().expect("producer panicked");

        // the producer never runs ahead of the consumer by more than the capacity
        assert_eq!(count, opts.num_items);
        assert!(peak <= opts.capacity);
        println!(
            "{:?}\telapsed {:?}ms\tpeak length {}",
            strategy,
            since.elapsed().as_millis(),
            peak
        );
    }
}

use lazy_react::{LazyReact, MaxActive};
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
struct Opts {
    #[structopt(long, default_value = "1000")]
    pub num_jobs: i64,
    #[structopt(long)]
    pub num_workers: Option<usize>,
    #[structopt(long, default_value = "16")]
    pub ceiling: usize,
    #[structopt(long)]
    pub sync: bool,
    #[structopt(long)]
    pub pooling: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opts = Opts::from_args();

    let mut react = LazyReact::parallel_builder(opts.num_workers)
        .expect("failed to start the runtime")
        .with_max_active(MaxActive::from(opts.ceiling));
    if opts.sync {
        react = react.sync_mode();
    }
    if opts.pooling {
        react = react.object_pooling_on();
    }

    let since = Instant::now();
    let outputs = react
        .range(0, opts.num_jobs)
        // blocking work runs on the executor's blocking pool
        .map(|value| {
            std::thread::sleep(Duration::from_millis(1));
            value * 2
        })
        // asynchronous work is awaited on the executor
        .then(|value| async move {
            lazy_react::rt::sleep(Duration::from_millis(1)).await;
            value + 1
        })
        .block()
        .expect("pipeline failed");

    // the output keeps the submission order
    let expect: Vec<_> = (0..opts.num_jobs).map(|value| value * 2 + 1).collect();
    assert_eq!(outputs, expect);

    println!("elapsed {:?}ms", since.elapsed().as_millis());
}

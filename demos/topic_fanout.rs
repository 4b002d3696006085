use futures::stream::{self, StreamExt as _};
use lazy_react::{Executor, LazyReact, Queue, Topic};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
struct Opts {
    #[structopt(long, default_value = "100")]
    pub num_items: usize,
    #[structopt(long, default_value = "3")]
    pub num_subscribers: usize,
    #[structopt(long, default_value = "8")]
    pub capacity: usize,
    #[structopt(long)]
    pub num_workers: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opts = Opts::from_args();
    let executor = Executor::new(opts.num_workers).expect("failed to start the runtime");
    let react = LazyReact::new(executor.clone());
    let spawner = executor.clone();

    executor.block_on(async move {
        let topic = Topic::with_builder(Queue::<usize>::builder().capacity(opts.capacity));

        // each subscriber runs its own pipeline over a copy of the items
        let pipelines: Vec<_> = (0..opts.num_subscribers)
            .map(|index| {
                react
                    .from_adapter(&topic)
                    .map(move |value| value * (index + 1))
                    .to_vec()
            })
            .collect();

        let producer = {
            let topic = topic.clone();
            let num_items = opts.num_items;
            spawner.spawn(async move {
                topic
                    .from_stream(stream::iter(0..num_items))
                    .await
                    .expect("topic closed early");
                topic.close();
            })
        };

        let outputs = futures::future::try_join_all(pipelines)
            .await
            .expect("pipeline failed");
        producer.await.expect("producer failed");

        for (index, output) in outputs.iter().enumerate() {
            let expect: Vec<_> = (0..opts.num_items).map(|value| value * (index + 1)).collect();
            assert_eq!(output, &expect);
            println!("subscriber {} received {} items", index, output.len());
        }
    });
}

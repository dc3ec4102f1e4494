use anyhow::{Context, Result};
use clap::Parser;
use streamdag_core::aggregate::counting;
use streamdag_core::dag::Dag;
use streamdag_core::event_time::{EventTimeMapper, EventTimePolicy, TimestampedItem};
use streamdag_core::watermark::LimitingLag;

/// Builds a three-vertex pipeline (`source -> count -> sink`), feeds a
/// handful of timestamped events through an `EventTimeMapper` using the
/// flags below, and prints the resulting watermark/item stream followed by
/// the DAG's topological dump.
#[derive(Parser, Debug)]
#[command(about = "Builds and drives a small streamdag_core pipeline")]
struct Args {
    /// How far behind the observed max timestamp the watermark trails.
    #[arg(long, default_value_t = 3)]
    lag: i64,

    /// Idle timeout in milliseconds before a silent partition is skipped.
    #[arg(long, default_value_t = 5_000)]
    idle_timeout_millis: i64,

    /// Watermarks are snapped down to multiples of this frame size; 0 disables throttling.
    #[arg(long, default_value_t = 1)]
    throttle_frame_size: i64,

    /// Event timestamps to feed through the coalescer, in order.
    #[arg(long, value_delimiter = ',', default_value = "10,90,101")]
    events: Vec<i64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let dag = build_dag().context("building demo DAG")?;
    println!("{}", dag.to_string_with_default_parallelism(1));

    let mut mapper = build_mapper(&args);
    mapper.add_partitions(0, 1);
    for (i, &event_time) in args.events.iter().enumerate() {
        let now = i as i64 * 100;
        let out = mapper
            .flat_map_event(now, Some(event_time), 0, event_time)
            .context("event-time mapper rejected event")?;
        for item in out {
            match item {
                TimestampedItem::Watermark(wm) => println!("watermark({})", wm.timestamp),
                TimestampedItem::Item(ev) => println!("item({ev})"),
            }
        }
    }

    let op = counting::<i64>();
    let mut acc = op.create();
    for &event_time in &args.events {
        op.accumulate(&mut acc, &event_time);
    }
    println!("count = {}", op.finish(&mut acc));

    Ok(())
}

fn build_dag() -> Result<Dag> {
    let mut dag = Dag::new();
    let source = dag.new_vertex("source")?;
    let count = dag.new_vertex("count")?;
    let sink = dag.new_vertex("sink")?;
    dag.edge(source, 0, count, 0)?;
    dag.edge(count, 0, sink, 0)?;
    Ok(dag)
}

fn build_mapper(args: &Args) -> EventTimeMapper<i64, i64, LimitingLag> {
    let lag = args.lag;
    let policy = EventTimePolicy::no_wrapping(
        None,
        move || LimitingLag::new(lag),
        args.idle_timeout_millis,
        args.throttle_frame_size,
        0,
    );
    EventTimeMapper::new(policy)
}

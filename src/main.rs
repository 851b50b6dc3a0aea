use leader_follower::{
    join_all, LeaderFollowerPool, Priority, PriorityQueue, Registry, WorkError, WorkItem,
};
use std::{error::Error, thread, time::Duration};
use tokio::runtime::Builder;
use tracing_subscriber::EnvFilter;


fn read_input(item: &WorkItem) -> Result<i32, WorkError> {
    item.input::<i32>()
        .copied()
        .ok_or_else(|| WorkError::invalid_input("expected i32 input"))
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    for n in 0..10 {
        let name = format!("test{n}");
        registry.register("test", name.clone(), move |item, _| {
            let input = read_input(item)?;
            if n < 5 {
                item.set_output(format!("{name} got: {input}"));
            } else {
                println!("{name} got: {input}");
            }
            Ok(())
        });
    }
    registry
        .register("features", "delay", |item, ctx| {
            let millis = read_input(item)?;
            println!("[{}] delay {}ms", ctx.worker_id(), millis);
            thread::sleep(Duration::from_millis(millis as u64));
            Ok(())
        })
        .register("features", "abort", |_, ctx| {
            println!("[{}] abort", ctx.worker_id());
            Err(ctx.cancel_self())
        });
    registry
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut queue = PriorityQueue::new();
    for priority in Priority::LEVELS {
        queue.enqueue(priority, format!("{priority:?}"))?;
    }
    while let Ok(name) = queue.dequeue() {
        println!("{name}");
    }

    let rt = Builder::new_current_thread().enable_all().build()?;
    let pool = LeaderFollowerPool::create(8, 5, 60, registry())?;

    let items: Vec<_> = (0..10).map(|n| WorkItem::new("test", format!("test{n}"), n)).collect();
    for (item, priority) in items.iter().zip(Priority::LEVELS.iter().rev()) {
        pool.submit_with_priority(item, *priority)?;
    }
    for item in &items[..5] {
        item.wait();
        if let Some(output) = item.output::<String>() {
            println!("{output}");
        }
    }

    let delays: Vec<_> = (0..8)
        .map(|n| WorkItem::new("features", "delay", 1000 + n * 50))
        .collect();
    for item in &delays {
        pool.submit_with_priority(item, Priority::Highest)?;
    }
    for (item, priority) in items[5..].iter().zip(Priority::LEVELS) {
        pool.submit_with_priority(item, priority)?;
    }
    let abort = WorkItem::new("features", "abort", ());
    pool.submit_with_priority(&abort, Priority::Lowest)?;

    let outcomes = rt.block_on(async {
        let all: Vec<_> = delays.iter().chain(&items[5..]).chain([&abort]).collect();
        join_all(all).await
    });
    let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();

    let metrics = pool.metrics();
    println!(
        "threads: {}, completed: {}, failed: {}, cancelled: {}",
        metrics.thread_count, metrics.completed, failed, metrics.cancelled
    );
    pool.shutdown();
    Ok(())
}

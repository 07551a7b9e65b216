use std::sync::Arc;
use std::time::Duration;

use attempter::{
    attempt_fn, pending_work_fn, AttemptFailure, Attempter, AttempterConfig,
    InMemoryPriorityQueue, SourceError, WorkUnit, WorkValue,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let store = Arc::new(InMemoryPriorityQueue::new());

    let config = AttempterConfig::new("orders")
        .with_max_active_attempts(4)
        .with_retry_delay(Duration::from_millis(500));

    let mut attempter = Attempter::builder(config)
        .store(store)
        .attempt(attempt_fn(|value: WorkValue| async move {
            match value.as_integer() {
                Some(n) if n % 3 == 0 => Err(AttemptFailure::new(format!("order {} not ready", n))),
                _ => {
                    println!("processed {:?}", value);
                    Ok(())
                }
            }
        }))
        .pending_work(pending_work_fn(|| async {
            Ok::<_, SourceError>((1..=10).map(|order| WorkUnit::new(order, 0)).collect())
        }))
        .start()
        .expect("valid configuration");

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("{:?}", attempter.stats());
    attempter.shutdown().await;
}

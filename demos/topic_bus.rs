//! # Example: Topic Bus
//!
//! Several readers subscribe to one topic, a publisher fans messages out to
//! all of them, and a bounded publish shows backpressure handling.
//!
//! Run with `RUST_LOG=debug cargo run --example topic_bus`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use unitvisor::{BusError, Config, EventBus};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bus: Arc<EventBus<String>> = Arc::new(EventBus::from_config(&Config::default()));

    let mut readers = Vec::new();
    for n in 0..3 {
        let Some(mut sub) = bus.subscribe("alerts") else {
            anyhow::bail!("bus closed before subscribe");
        };
        let bus = Arc::clone(&bus);
        readers.push(tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                println!("[reader-{n}] {msg}");
            }
            let _ = bus.unsubscribe("alerts", &sub);
        }));
    }
    println!("subscribers on alerts: {:?}", bus.subscriber_count("alerts"));

    let delivered = bus
        .publish("alerts", ["overheat".to_string(), "door open".to_string()])
        .await;
    println!("published: {delivered}");
    println!("nobody listens on audit: {}", !bus.publish("audit", ["x".to_string()]).await);

    // A reader that never reads fills its buffer; the bounded publish gives up.
    let _stalled = bus.subscribe("slow");
    let fill: Vec<String> = (0..bus.buffer()).map(|i| format!("tick {i}")).collect();
    bus.publish("slow", fill).await;
    let res = bus
        .publish_async(
            &CancellationToken::new(),
            Duration::from_millis(100),
            "slow",
            ["one too many".to_string()],
        )
        .await;
    assert_eq!(res, Err(BusError::AsyncTimeout));
    println!("bounded publish: {res:?}");
    println!("topics: {}", bus.topics());

    bus.close();
    for r in readers {
        r.await?;
    }
    println!("after close: {}", bus.topics());
    Ok(())
}

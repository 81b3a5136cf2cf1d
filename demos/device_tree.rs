//! # Example: Device Tree
//!
//! Three units share one root scope. The sensor publishes readings on the
//! bus, the actuator consumes them, and the controller hands a calibration
//! result back through a completion token. `ComponentSet` starts and stops
//! them as one batch.
//!
//! Run with `RUST_LOG=debug cargo run --example device_tree` to see the kernel logs.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use unitvisor::{
    Component, ComponentSet, CompletionToken, ControlScope, EventBus, Lifecycle, LifecycleRef,
    RoutineFn, ScopeToken, WorkError,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let root = ControlScope::new(None);
    let bus: Arc<EventBus<f64>> = Arc::new(EventBus::new(16));
    let calibrated = Arc::new(CompletionToken::new());

    let sensor = {
        let bus = Arc::clone(&bus);
        Component::builder("sensor")
            .id("thermo-1")
            .scope(root.fork())
            .routine(RoutineFn::arc(move |ctx: ScopeToken| {
                let bus = Arc::clone(&bus);
                async move {
                    let mut reading = 20.0;
                    while !ctx.is_cancelled() {
                        reading += 0.5;
                        bus.publish("temperature", [reading]).await;
                        tokio::select! {
                            _ = ctx.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                        }
                    }
                    Ok::<(), WorkError>(())
                }
            }))
            .build_arc()
    };

    let actuator = {
        let bus = Arc::clone(&bus);
        Component::builder("actuator")
            .id("fan-1")
            .scope(root.fork())
            .routine(RoutineFn::arc(move |ctx: ScopeToken| {
                let bus = Arc::clone(&bus);
                async move {
                    let Some(mut readings) = bus.subscribe("temperature") else {
                        return Ok::<(), WorkError>(());
                    };
                    loop {
                        tokio::select! {
                            _ = ctx.cancelled() => break,
                            msg = readings.recv() => match msg {
                                Some(t) if t > 21.0 => println!("[fan-1] {t:.1}°C, spinning up"),
                                Some(t) => println!("[fan-1] {t:.1}°C, idle"),
                                None => break,
                            },
                        }
                    }
                    let _ = bus.unsubscribe("temperature", &readings);
                    Ok(())
                }
            }))
            .build_arc()
    };

    let controller = {
        let calibrated = Arc::clone(&calibrated);
        Component::builder("controller")
            .id("ctl-1")
            .scope(root.fork())
            .routine(RoutineFn::arc(move |ctx: ScopeToken| {
                let calibrated = Arc::clone(&calibrated);
                async move {
                    tokio::time::sleep(Duration::from_millis(120)).await;
                    tokio::select! {
                        _ = ctx.cancelled() => return Ok::<(), WorkError>(()),
                        _ = calibrated.completed() => {}
                    }
                    ctx.cancelled().await;
                    Ok(())
                }
            }))
            .build_arc()
    };

    let members: [Option<LifecycleRef>; 4] = [
        Some(sensor.clone()),
        None,
        Some(actuator.clone()),
        Some(controller.clone()),
    ];
    let set = ComponentSet::new(members);
    set.start().await?;
    println!("started: {} / {} / {}", sensor.info(), actuator.info(), controller.info());

    if calibrated.wait_timeout(Duration::from_secs(1)).await {
        println!("[main] controller calibrated");
    } else {
        println!("[main] calibration failed: {:?}", calibrated.err());
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("bus: {}", bus.topics());

    set.stop().await?;
    bus.close();
    bus.wait_async().await;
    set.finalize().await?;
    println!("finalized, bus: {}", bus.topics());
    Ok(())
}

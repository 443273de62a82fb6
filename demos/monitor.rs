//! Lists controllers, streams one of them for a few seconds, then shuts down.
//!
//! ```text
//! cargo run --example monitor -- [index] [--json] [--config reader.toml]
//! RUST_LOG=padscope=debug cargo run --example monitor
//! ```

use padscope::{EventFilter, FilteredListener, LogListener, ReaderConfig, ReaderEvent, Router};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut index = 0usize;
    let mut json = false;
    let mut config = ReaderConfig::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--config" => {
                let path = args.next().expect("--config needs a path");
                config = ReaderConfig::load(&path).expect("load config");
            }
            other => index = other.parse().expect("device index"),
        }
    }

    let mut router = Router::new(&config);
    let devices = router.connected_controllers();
    println!("Controllers:");
    for (i, d) in devices.iter().enumerate() {
        println!("  [{i}] {} via {} id={}", d.display_name(), d.backend, d.id);
    }
    let Some(device) = devices.get(index) else {
        println!("no controller at index {index}");
        return;
    };

    router.subscribe(LogListener::new(), EventFilter::ErrorsOnly);
    router.subscribe(
        FilteredListener::on_change(move |e: &ReaderEvent| {
            let Some(frame) = e.frame() else { return };
            if json {
                println!("{}", serde_json::to_string(frame).expect("serialize frame"));
            } else {
                let hex: Vec<String> = (0..frame.len()).map(|i| frame.hex(i)).collect();
                println!("{}", hex.join(" "));
            }
        }),
        EventFilter::FramesOnly,
    );

    if let Err(e) = router.start_reading(device) {
        eprintln!("cannot read {}: {e}", device.display_name());
        return;
    }
    std::thread::sleep(Duration::from_secs(5));
    router.dispose();
}

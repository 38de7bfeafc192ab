use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::{thread, time};

use mdb_server::DeviceHandle;

fn main() -> mdb_server::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    let stop = Arc::new(AtomicBool::new(false));

    // Set signal handlers
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;

    let serial_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".into());

    let handle = DeviceHandle::open(&serial_path)?;
    handle.start()?;

    let mut events = handle.subscribe();

    while !stop.load(Ordering::Relaxed) {
        while let Ok(event) = events.pop_event() {
            log::info!("Device event: {event}");
        }

        // Sleep for a bit to avoid a tight loop
        thread::sleep(time::Duration::from_millis(100));
    }

    handle.stop();

    Ok(())
}

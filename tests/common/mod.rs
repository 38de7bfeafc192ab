#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;

use parking_lot::{Mutex, MutexGuard};

use mdb_server::{Error, Link, Result};

// Long enough for every deadline-driven scenario queued ahead of a test.
const LOCK_TIMEOUT_SECS: u64 = 60;

static INIT: AtomicBool = AtomicBool::new(false);
static LOCK: Mutex<()> = Mutex::new(());

fn is_init() -> bool {
    INIT.load(Ordering::Relaxed)
}

fn set_init(val: bool) {
    INIT.store(val, Ordering::SeqCst);
}

/// Initialises logging and serialises tests that share the controller's
/// global flags.
pub fn init() -> Result<MutexGuard<'static, ()>> {
    if !is_init() {
        set_init(true);
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
            .try_init()
            .ok();
    }

    LOCK.try_lock_for(time::Duration::from_secs(LOCK_TIMEOUT_SECS))
        .ok_or(Error::Lock("test mutex"))
}

/// Log of every command line written to a [MockLink].
pub type SentLog = Arc<Mutex<Vec<String>>>;

/// Scripted line channel standing in for the serial bridge.
///
/// Script entries are `(command, response)` pairs consumed in order: when
/// the next written command equals the front entry, that entry is popped
/// and its response is returned by the following read. Commands that do
/// not match the front entry get a default — polls answer the empty line
/// (nothing pending), everything else answers `p,ACK`.
pub struct MockLink {
    script: VecDeque<(String, String)>,
    pending: Option<String>,
    sent: SentLog,
}

impl MockLink {
    pub fn new(script: Vec<(&str, &str)>) -> (Self, SentLog) {
        let sent: SentLog = Arc::new(Mutex::new(Vec::new()));
        let link = Self {
            script: script
                .into_iter()
                .map(|(command, response)| (command.to_string(), response.to_string()))
                .collect(),
            pending: None,
            sent: Arc::clone(&sent),
        };
        (link, sent)
    }

    fn default_response(command: &str) -> String {
        match command {
            "R,33" | "R,0B" => String::new(),
            _ => "p,ACK".to_string(),
        }
    }
}

impl Link for MockLink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.sent.lock().push(line.to_string());

        let scripted = match self.script.front() {
            Some((command, _)) if command == line => {
                self.script.pop_front().map(|(_, response)| response)
            }
            _ => None,
        };

        self.pending = Some(scripted.unwrap_or_else(|| Self::default_response(line)));
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        Ok(self.pending.take().unwrap_or_default())
    }

    fn close(&mut self) {}
}

/// Stops the handle when a test exits, panicking or not, so the global
/// polling flag is released for the next test.
pub struct StopGuard(pub mdb_server::DeviceHandle);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

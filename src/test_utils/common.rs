use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use tracing_subscriber::EnvFilter;

use crate::ConfigKind;
use crate::WatchEvent;
use crate::WatchHandler;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Watch handler that forwards every event it receives
pub struct RecordingHandler {
    events: Sender<(ConfigKind, WatchEvent)>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, Receiver<(ConfigKind, WatchEvent)>) {
        let (events, rx) = unbounded();
        (Arc::new(Self { events }), rx)
    }
}

impl WatchHandler for RecordingHandler {
    fn handle_watch(
        &self,
        tag: ConfigKind,
        event: WatchEvent,
    ) {
        let _ = self.events.send((tag, event));
    }
}

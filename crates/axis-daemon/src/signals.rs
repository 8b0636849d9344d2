//! Signal handling for clean shutdown.
//!
//! SIGINT and SIGTERM raise the process-wide stop flag; both threads poll
//! it once per iteration, so the process finishes the cycle in flight and
//! exits through the cooperative shutdown path. Signal handlers must be
//! async-signal-safe, so the handler only touches a static atomic and a
//! watcher thread forwards it to the shared state.

use axis_common::SharedStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Installed process signal handling, forwarding into [`SharedStatus`].
#[derive(Debug)]
pub struct SignalHandler {
    shared: Arc<SharedStatus>,
}

impl SignalHandler {
    /// Register SIGINT/SIGTERM handlers and start the forwarding thread.
    pub fn install(shared: Arc<SharedStatus>) -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::raw::c_int;

            extern "C" fn on_signal(_: c_int) {
                SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
            }

            // SAFETY: on_signal only stores to a static atomic, which is
            // async-signal-safe
            unsafe {
                libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
                libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
            }
            debug!("signal handlers registered");
        }

        let watcher_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("axis-signals".into())
            .spawn(move || loop {
                if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
                    info!("shutdown signal received");
                    watcher_shared.request_stop();
                }
                if watcher_shared.stop_requested() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            })?;

        Ok(Self { shared })
    }

    /// True once shutdown has been requested, by a signal or otherwise.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// Raise the stop flag from code paths other than a signal.
    pub fn request_shutdown(&self) {
        self.shared.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_shutdown_propagates() {
        let shared = Arc::new(SharedStatus::new());
        let handler = SignalHandler::install(Arc::clone(&shared)).unwrap();
        assert!(!handler.shutdown_requested());

        handler.request_shutdown();
        assert!(handler.shutdown_requested());
        assert!(shared.stop_requested());
    }

    #[test]
    fn raw_flag_is_forwarded() {
        let shared = Arc::new(SharedStatus::new());
        let handler = SignalHandler::install(Arc::clone(&shared)).unwrap();

        // Re-raise until our watcher observes it; a concurrently running
        // test's watcher may consume the shared static first
        for _ in 0..100 {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
            if handler.shutdown_requested() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handler.shutdown_requested());
    }
}

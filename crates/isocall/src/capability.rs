//! # Isolate Capability
//!
//! Decides whether this environment can host isolates. Two things are needed:
//! a tokio runtime for the dispatcher's pump, and the ability to spawn an OS
//! thread for the isolate itself.

use std::sync::OnceLock;
use std::thread;

static THREADS: OnceLock<bool> = OnceLock::new();

/// Whether calls can run on an isolate thread from here.
pub fn isolates_available() -> bool {
    if tokio::runtime::Handle::try_current().is_err() {
        tracing::debug!("no tokio runtime; isolates unavailable");
        return false;
    }
    *THREADS.get_or_init(probe_threads)
}

fn probe_threads() -> bool {
    let spawned = thread::Builder::new()
        .name("isocall-probe".into())
        .spawn(|| ())
        .and_then(|handle| {
            handle
                .join()
                .map_err(|_| std::io::Error::other("probe thread panicked"))
        });

    match spawned {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "cannot spawn threads; isolates unavailable");
            false
        }
    }
}

//! Thread helpers for pipeline stages

use std::io;
use std::thread::{Builder, JoinHandle};

use tracing::{debug, warn};

/// Spawn a named stage thread, optionally pinned to one CPU.
///
/// Pinning is best effort; a core id the OS rejects is logged and the
/// thread runs unpinned.
pub fn spawn_named<F, T>(
    name: &str,
    cpu_affinity: Option<usize>,
    f: F,
) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let thread_name = name.to_string();
    Builder::new().name(name.to_string()).spawn(move || {
        if let Some(id) = cpu_affinity {
            if core_affinity::set_for_current(core_affinity::CoreId { id }) {
                debug!(thread = %thread_name, cpu = id, "thread pinned");
            } else {
                warn!(thread = %thread_name, cpu = id, "failed to pin thread");
            }
        }
        f()
    })
}

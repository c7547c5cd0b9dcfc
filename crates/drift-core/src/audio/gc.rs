//! Deferred deallocation for decoded waveforms
//!
//! The audio cache evicts whole waveforms every craft cycle, and the mixer
//! drops its references as picks leave the mix window. Freeing a large
//! buffer is slow, so waveforms live in `basedrop::Shared<T>`: dropping the
//! last reference only enqueues the pointer, and a dedicated collector
//! thread does the actual deallocation.
//!
//! ## Usage
//!
//! ```ignore
//! use basedrop::Shared;
//! use drift_core::audio::gc::gc_handle;
//!
//! let handle = gc_handle().ok_or(AudioError::CollectorUnavailable)?;
//! let waveform = Shared::new(&handle, decoded);
//! drop(waveform); // freed later on the collector thread
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Interval between collection passes
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Global handle for creating `Shared<T>` allocations
///
/// `None` when the collector thread could not be started.
static GC_HANDLE: OnceLock<Option<Handle>> = OnceLock::new();

/// Start the collector thread and return a handle to it
fn init_gc() -> Option<Handle> {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("waveform-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it is created on the thread that drives it
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Waveform GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned {
        Ok(_) => rx.recv().ok(),
        Err(e) => {
            log::error!("Failed to spawn waveform GC thread: {}", e);
            None
        }
    }
}

/// Get a handle for creating `Shared<T>` allocations
pub fn gc_handle() -> Option<Handle> {
    GC_HANDLE.get_or_init(init_gc).clone()
}

//! # Process-Wide Diagnostic Log Callback
//!
//! Low-level engine warnings (hot-journal recovery, checksum mismatches,
//! checkpoint failures) are routed through a single process-wide hook invoked
//! with `(code, message)`. The hook is installable exactly once, and only
//! before the first connection is opened; attempting to change it afterwards
//! fails closed with a usage error.
//!
//! The one-shot discipline exists because the callback is read without
//! synchronization on hot paths once the engine is running. A state flag is
//! flipped on first connection open, after which the registration window is
//! permanently shut.

use eyre::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SoleError;

pub type LogCallback = Box<dyn Fn(i32, &str) + Send + Sync>;

static ENGINE_USED: AtomicBool = AtomicBool::new(false);
static CALLBACK_SET: AtomicBool = AtomicBool::new(false);
static CALLBACK: Mutex<Option<LogCallback>> = Mutex::new(None);

/// Installs the process-wide diagnostic callback.
///
/// Must be called before the first connection is opened, and at most once.
pub fn set_log_callback(cb: LogCallback) -> Result<()> {
    if ENGINE_USED.load(Ordering::Acquire) {
        return Err(SoleError::usage(
            "log callback must be installed before the first connection is opened",
        )
        .into());
    }
    if CALLBACK_SET.swap(true, Ordering::AcqRel) {
        return Err(SoleError::usage("log callback is already installed").into());
    }
    *CALLBACK.lock() = Some(cb);
    Ok(())
}

/// Marks the engine as used, closing the registration window.
pub(crate) fn mark_engine_used() {
    ENGINE_USED.store(true, Ordering::Release);
}

/// Emits a diagnostic through the installed callback, if any.
pub(crate) fn log(code: i32, message: &str) {
    if CALLBACK_SET.load(Ordering::Acquire) {
        if let Some(cb) = CALLBACK.lock().as_ref() {
            cb(code, message);
        }
    }
    tracing::debug!(code, message, "engine diagnostic");
}

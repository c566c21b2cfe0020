//! Cooperative cancellation for long-running builds.
//!
//! A process-wide flag polled between heavy phases of the bulk loaders and
//! before each subtree write. Front-ends wire their signal handling to
//! [`request_cancel`]; the core only ever observes the flag at poll points,
//! so a cancelled build stops cleanly with partial on-disk state (persisted
//! subtrees, no top-level file).

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{IndexError, Result};

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Raise the cancellation flag; the next poll point aborts.
pub fn request_cancel() {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

/// Lower the cancellation flag, e.g. before starting a fresh build.
pub fn clear_cancel() {
    CANCEL_REQUESTED.store(false, Ordering::SeqCst);
}

/// Poll point: errors with [`IndexError::Cancelled`] when a cancellation has
/// been requested.
pub fn check_signals() -> Result<()> {
    if CANCEL_REQUESTED.load(Ordering::SeqCst) {
        return Err(IndexError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_roundtrip() {
        clear_cancel();
        assert!(check_signals().is_ok());
        request_cancel();
        assert!(matches!(check_signals(), Err(IndexError::Cancelled)));
        clear_cancel();
        assert!(check_signals().is_ok());
    }
}

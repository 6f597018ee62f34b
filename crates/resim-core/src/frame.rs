//! Frame counting for the fixed-step simulation
//!
//! A [`Frame`] is one fixed step's sequence number. Authoritative data
//! arrives tagged with the sender's frame and a [`FrameOffset`] mapping it
//! into the local frame line.

use serde::{Deserialize, Serialize};

/// A fixed-step simulation frame number (logical time unit)
pub type Frame = u64;

/// Signed offset between a remote frame line and the local one
pub type FrameOffset = i64;

/// Map a remote frame into the local frame line
///
/// Returns `None` when the offset would move the frame below zero, which
/// means the payload predates local frame history entirely.
pub fn apply_offset(frame: Frame, offset: FrameOffset) -> Option<Frame> {
    if offset >= 0 {
        frame.checked_add(offset as u64)
    } else {
        frame.checked_sub(offset.unsigned_abs())
    }
}

/// Context handed to every deterministic tick function
///
/// The tick must be a pure function of this context, its input command, and
/// its prior state; `resimulating` is informational (e.g. to suppress
/// cosmetic side effects) and must not change the produced state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickContext {
    /// The frame being produced
    pub frame: Frame,
    /// Fixed step size in seconds
    pub delta_time: f64,
    /// True while replaying frames after a rollback
    pub resimulating: bool,
}

impl TickContext {
    /// Create a context for a normal (non-replay) step
    pub fn new(frame: Frame, delta_time: f64) -> Self {
        Self {
            frame,
            delta_time,
            resimulating: false,
        }
    }

    /// Create a context for a replayed step
    pub fn replay(frame: Frame, delta_time: f64) -> Self {
        Self {
            frame,
            delta_time,
            resimulating: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_offset() {
        assert_eq!(apply_offset(10, 5), Some(15));
        assert_eq!(apply_offset(10, -4), Some(6));
        assert_eq!(apply_offset(3, -4), None);
        assert_eq!(apply_offset(u64::MAX, 1), None);
    }

    #[test]
    fn test_tick_context() {
        let ctx = TickContext::new(7, 1.0 / 60.0);
        assert!(!ctx.resimulating);
        let ctx = TickContext::replay(7, 1.0 / 60.0);
        assert!(ctx.resimulating);
        assert_eq!(ctx.frame, 7);
    }
}

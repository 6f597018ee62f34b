//! Resim History - Frame-indexed ring buffer for rollback
//!
//! [`FrameHistory`] is the backbone of resimulation: a fixed-capacity
//! circular array indexed by `frame % capacity`. Writes only ever happen at
//! the head (or the head plus one, advancing first); rollback moves the
//! head back without destroying the slots above it, so a replay re-sees the
//! frames it is about to overwrite.
//!
//! # Example
//!
//! ```rust
//! use resim_history::FrameHistory;
//!
//! let mut history: FrameHistory<u32> = FrameHistory::new(64);
//! history.seed(0, 100);
//!
//! history.advance();          // frame 1 starts as a copy of frame 0
//! *history.write(1) += 1;
//!
//! assert_eq!(history.read(0), Some(&100));
//! assert_eq!(history.read(1), Some(&101));
//!
//! history.rollback(0).unwrap();
//! assert_eq!(history.head(), Some(0));
//! assert_eq!(history.read(1), None); // above the head again
//! ```

use resim_core::Frame;
use thiserror::Error;

/// History error type
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// The requested rollback frame has already been evicted
    ///
    /// This means a correction could not be honored and must be surfaced as
    /// a desynchronization, not silently ignored.
    #[error("cannot roll back to frame {target}, oldest retained is {tail}")]
    RollbackTooFar { target: Frame, tail: Frame },

    /// The history holds no frames yet
    #[error("history is empty")]
    Empty,
}

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Fixed-capacity circular frame history
///
/// Each slot stores `(frame, value)`; a frame's slot is `frame % capacity`.
/// `advance` copies the previous frame's value forward, so state is
/// "sticky" by default: every frame starts as a copy of the prior frame
/// unless overwritten. The exception is a frame that was already produced
/// before a rollback, whose preserved contents are kept so a replay starts
/// from the originally recorded data.
#[derive(Debug, Clone)]
pub struct FrameHistory<T> {
    slots: Vec<Option<(Frame, T)>>,
    capacity: usize,
    /// (head, tail, highest frame ever produced); None until seeded
    span: Option<(Frame, Frame, Frame)>,
}

impl<T: Clone + Default> FrameHistory<T> {
    /// Create an empty history with the given capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be greater than 0");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            span: None,
        }
    }

    fn index(&self, frame: Frame) -> usize {
        (frame as usize) % self.capacity
    }

    /// Place the first entry
    ///
    /// # Panics
    ///
    /// Panics if the history was already seeded.
    pub fn seed(&mut self, frame: Frame, value: T) {
        assert!(self.span.is_none(), "history seeded twice");
        let index = self.index(frame);
        self.slots[index] = Some((frame, value));
        self.span = Some((frame, frame, frame));
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest readable frame
    pub fn head(&self) -> Option<Frame> {
        self.span.map(|(head, _, _)| head)
    }

    /// Oldest retained frame: `head − retained + 1`
    pub fn tail(&self) -> Option<Frame> {
        self.span.map(|(_, tail, _)| tail)
    }

    /// Highest frame ever produced (may exceed the head after a rollback)
    pub fn written(&self) -> Option<Frame> {
        self.span.map(|(_, _, written)| written)
    }

    /// Number of readable frames in `[tail, head]`
    pub fn retained(&self) -> usize {
        match self.span {
            Some((head, tail, _)) => (head - tail + 1) as usize,
            None => 0,
        }
    }

    /// Read the value at a frame
    ///
    /// Returns `None` outside `[tail, head]`, including for frames above a
    /// rolled-back head.
    pub fn read(&self, frame: Frame) -> Option<&T> {
        let (head, tail, _) = self.span?;
        if frame < tail || frame > head {
            return None;
        }
        self.slots[self.index(frame)]
            .as_ref()
            .filter(|(f, _)| *f == frame)
            .map(|(_, value)| value)
    }

    /// Mutable access to a frame's value
    ///
    /// # Panics
    ///
    /// Panics unless `frame` is the head or the head plus one (the latter
    /// advances first). Writing into the middle of history without an
    /// explicit rollback is a programmer error.
    pub fn write(&mut self, frame: Frame) -> &mut T {
        let (head, ..) = self.span.expect("history must be seeded before writing");
        if frame == head + 1 {
            self.advance();
        } else {
            assert!(
                frame == head,
                "history write at frame {frame} but head is {head}"
            );
        }
        let index = self.index(frame);
        self.slots[index]
            .as_mut()
            .map(|(_, value)| value)
            .expect("head slot populated")
    }

    /// Advance the head by one frame and return the new head
    ///
    /// The new frame starts as a copy of the previous frame's value. If the
    /// frame was already produced before a rollback, its preserved contents
    /// are kept instead so a replay starts from the original record.
    ///
    /// # Panics
    ///
    /// Panics if the history was never seeded.
    pub fn advance(&mut self) -> Frame {
        let (head, mut tail, written) = self.span.expect("history must be seeded before advancing");
        let next = head + 1;
        let index = self.index(next);

        let preserved = next <= written
            && self.slots[index]
                .as_ref()
                .map(|(f, _)| *f == next)
                .unwrap_or(false);
        if !preserved {
            let carried = self.slots[self.index(head)]
                .as_ref()
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            self.slots[index] = Some((next, carried));
        }

        if (next - tail) as usize >= self.capacity {
            tail = next + 1 - self.capacity as Frame;
        }
        self.span = Some((next, tail, written.max(next)));
        next
    }

    /// Move the head back to `frame`
    ///
    /// Slots above the new head stay intact (and become visible to `advance`
    /// again during replay), but `read` no longer serves them.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is above the current head; rolling "back" forwards
    /// is a programmer error.
    pub fn rollback(&mut self, frame: Frame) -> Result<()> {
        let (head, tail, written) = self.span.ok_or(HistoryError::Empty)?;
        assert!(
            frame <= head,
            "rollback target {frame} is above head {head}"
        );
        if frame < tail {
            return Err(HistoryError::RollbackTooFar {
                target: frame,
                tail,
            });
        }
        self.span = Some((frame, tail, written));
        Ok(())
    }

    /// Iterate every populated slot in `[tail, written]` mutably
    ///
    /// Includes frames preserved above a rolled-back head, so a rename can
    /// re-key history it is about to replay as well.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Frame, &mut T)> {
        let (tail, written) = match self.span {
            Some((_, tail, written)) => (tail, written),
            None => (1, 0),
        };
        self.slots.iter_mut().filter_map(move |slot| {
            slot.as_mut()
                .filter(|(f, _)| *f >= tail && *f <= written)
                .map(|(f, value)| (*f, &mut *value))
        })
    }

    /// Drop all frames
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.span = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(frames: Frame) -> FrameHistory<u64> {
        let mut history = FrameHistory::new(8);
        history.seed(0, 0);
        for f in 1..=frames {
            history.advance();
            *history.write(f) = f;
        }
        history
    }

    #[test]
    fn test_seed_and_read() {
        let mut history: FrameHistory<u64> = FrameHistory::new(4);
        history.seed(5, 42);
        assert_eq!(history.head(), Some(5));
        assert_eq!(history.tail(), Some(5));
        assert_eq!(history.read(5), Some(&42));
        assert_eq!(history.read(4), None);
    }

    #[test]
    fn test_advance_copies_forward() {
        let mut history: FrameHistory<u64> = FrameHistory::new(4);
        history.seed(0, 7);
        history.advance();
        // Frame 1 starts as a copy of frame 0.
        assert_eq!(history.read(1), Some(&7));
        *history.write(1) = 8;
        assert_eq!(history.read(0), Some(&7));
        assert_eq!(history.read(1), Some(&8));
    }

    #[test]
    fn test_eviction_boundary() {
        let history = filled(20);
        assert_eq!(history.head(), Some(20));
        assert_eq!(history.tail(), Some(13));
        assert_eq!(history.read(12), None);
        for f in 13..=20 {
            assert_eq!(history.read(f), Some(&f));
        }
        assert_eq!(history.read(21), None);
    }

    #[test]
    fn test_rollback_and_boundary_after() {
        let mut history = filled(20);
        history.rollback(15).unwrap();
        assert_eq!(history.head(), Some(15));
        assert_eq!(history.tail(), Some(13));
        assert_eq!(history.read(15), Some(&15));
        assert_eq!(history.read(16), None);
        assert_eq!(history.read(12), None);
    }

    #[test]
    fn test_rollback_too_far() {
        let mut history = filled(20);
        let err = history.rollback(5).unwrap_err();
        assert_eq!(
            err,
            HistoryError::RollbackTooFar {
                target: 5,
                tail: 13
            }
        );
    }

    #[test]
    fn test_replay_preserves_recorded_frames() {
        let mut history = filled(10);
        history.rollback(6).unwrap();
        // Replaying forward re-sees the original records, not copies of
        // frame 6.
        assert_eq!(history.advance(), 7);
        assert_eq!(history.read(7), Some(&7));
        *history.write(7) = 70;
        assert_eq!(history.advance(), 8);
        assert_eq!(history.read(8), Some(&8));
    }

    #[test]
    fn test_write_next_frame_advances() {
        let mut history: FrameHistory<u64> = FrameHistory::new(4);
        history.seed(0, 1);
        *history.write(1) = 2;
        assert_eq!(history.head(), Some(1));
        assert_eq!(history.read(1), Some(&2));
    }

    #[test]
    #[should_panic(expected = "but head is")]
    fn test_write_off_head_panics() {
        let mut history = filled(10);
        history.write(5);
    }

    #[test]
    fn test_iter_mut_rekeys_everything() {
        let mut history = filled(10);
        history.rollback(8).unwrap();
        let mut seen: Vec<Frame> = history.iter_mut().map(|(f, _)| f).collect();
        seen.sort_unstable();
        // Preserved frames 9 and 10 are included.
        assert_eq!(seen, (3..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_rollback_round_trip_identical() {
        // N ticks, rollback, re-tick with the same writes: identical result.
        let mut history = filled(10);
        let original = *history.read(10).unwrap();
        history.rollback(4).unwrap();
        for f in 5..=10 {
            history.advance();
            *history.write(f) = f;
        }
        assert_eq!(history.read(10), Some(&original));
    }
}

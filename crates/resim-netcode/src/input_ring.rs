//! Frame-indexed buffered input
//!
//! The buffered input policy stores commands for future steps (typically a
//! network-delivered batch) and hands them out by step number. One ring
//! exists per controlled instance on the side that consumes the inputs.

use resim_core::Frame;
use std::collections::BTreeMap;

/// Bounded frame-indexed queue of input commands
///
/// A duplicate frame overwrites the earlier command; pushing beyond
/// capacity is an error so a stalled consumer surfaces instead of growing
/// without bound.
#[derive(Debug, Clone)]
pub struct InputRing<T> {
    inputs: BTreeMap<Frame, T>,
    capacity: usize,
    last_consumed: Option<Frame>,
}

impl<T> InputRing<T> {
    /// Create a ring holding at most `capacity` frames of input
    pub fn new(capacity: usize) -> Self {
        Self {
            inputs: BTreeMap::new(),
            capacity: capacity.max(1),
            last_consumed: None,
        }
    }

    /// Buffer an input for a step
    ///
    /// Returns [`Error::InputRingFull`](crate::Error::InputRingFull) when
    /// the ring is at capacity and `frame` is not already present.
    pub fn push(&mut self, frame: Frame, input: T) -> crate::Result<()> {
        if self.inputs.len() >= self.capacity && !self.inputs.contains_key(&frame) {
            return Err(crate::Error::InputRingFull);
        }
        self.inputs.insert(frame, input);
        Ok(())
    }

    /// Look at the input buffered for a step
    pub fn get(&self, frame: Frame) -> Option<&T> {
        self.inputs.get(&frame)
    }

    /// Drain every input buffered for steps `<= frame`
    ///
    /// Records `frame` as the last consumed step.
    pub fn take_through(&mut self, frame: Frame) -> Vec<(Frame, T)> {
        let rest = self.inputs.split_off(&(frame + 1));
        let drained: Vec<(Frame, T)> = std::mem::replace(&mut self.inputs, rest).into_iter().collect();
        self.last_consumed = Some(self.last_consumed.map_or(frame, |f| f.max(frame)));
        drained
    }

    /// Newest buffered step, if any
    pub fn latest_frame(&self) -> Option<Frame> {
        self.inputs.keys().next_back().copied()
    }

    /// Oldest buffered step, if any
    pub fn oldest_frame(&self) -> Option<Frame> {
        self.inputs.keys().next().copied()
    }

    /// Last step handed to the consumer
    pub fn last_consumed(&self) -> Option<Frame> {
        self.last_consumed
    }

    /// Number of buffered inputs
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Check whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Drop everything, keeping the consumption mark
    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut ring: InputRing<u32> = InputRing::new(8);
        ring.push(5, 50).unwrap();
        ring.push(6, 60).unwrap();
        assert_eq!(ring.get(5), Some(&50));
        assert_eq!(ring.get(7), None);
        assert_eq!(ring.latest_frame(), Some(6));
        assert_eq!(ring.oldest_frame(), Some(5));
    }

    #[test]
    fn test_duplicate_frame_overwrites() {
        let mut ring: InputRing<u32> = InputRing::new(2);
        ring.push(1, 10).unwrap();
        ring.push(2, 20).unwrap();
        ring.push(2, 21).unwrap();
        assert_eq!(ring.get(2), Some(&21));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_capacity_bound() {
        let mut ring: InputRing<u32> = InputRing::new(2);
        ring.push(1, 10).unwrap();
        ring.push(2, 20).unwrap();
        assert!(ring.push(3, 30).is_err());
    }

    #[test]
    fn test_take_through() {
        let mut ring: InputRing<u32> = InputRing::new(8);
        for f in 1..=4 {
            ring.push(f, f as u32 * 10).unwrap();
        }
        let drained = ring.take_through(2);
        assert_eq!(drained, vec![(1, 10), (2, 20)]);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.last_consumed(), Some(2));

        // Consumption mark never moves backwards.
        ring.take_through(1);
        assert_eq!(ring.last_consumed(), Some(2));
    }
}

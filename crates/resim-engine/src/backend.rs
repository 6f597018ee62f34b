//! Step backend contract
//!
//! The backend owns the step counter: it decides which frame numbers run
//! when the engine is asked to advance, and how far back a rewind may
//! reach. The engine stays agnostic of where steps actually come from
//! (a plain counter here, a physics scene's internal stepper elsewhere).

use resim_core::Frame;

/// Supplies step numbers to the engine loop
pub trait StepBackend: Send {
    /// Latest step the backend has run
    fn current_step(&self) -> Frame;

    /// Earliest step the backend can still rewind to
    ///
    /// Rollback targets below this are clamped up to it.
    fn earliest_retained_step(&self) -> Frame;

    /// Run `count` steps, invoking `per_step` with each step number in order
    fn run_steps(&mut self, count: u32, per_step: &mut dyn FnMut(Frame));
}

/// Pure counter backend; retains the full step range
///
/// The default backend, also used throughout the test suites.
#[derive(Debug, Clone)]
pub struct LockstepBackend {
    step: Frame,
    earliest: Frame,
}

impl LockstepBackend {
    /// Create a backend whose first produced step is `start + 1`
    pub fn new(start: Frame) -> Self {
        Self {
            step: start,
            earliest: start,
        }
    }
}

impl StepBackend for LockstepBackend {
    fn current_step(&self) -> Frame {
        self.step
    }

    fn earliest_retained_step(&self) -> Frame {
        self.earliest
    }

    fn run_steps(&mut self, count: u32, per_step: &mut dyn FnMut(Frame)) {
        for _ in 0..count {
            self.step += 1;
            per_step(self.step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockstep_counts_from_start() {
        let mut backend = LockstepBackend::new(10);
        let mut seen = Vec::new();
        backend.run_steps(3, &mut |frame| seen.push(frame));
        assert_eq!(seen, vec![11, 12, 13]);
        assert_eq!(backend.current_step(), 13);
        assert_eq!(backend.earliest_retained_step(), 10);
    }

    #[test]
    fn test_zero_steps_is_a_no_op() {
        let mut backend = LockstepBackend::new(0);
        backend.run_steps(0, &mut |_| panic!("no step expected"));
        assert_eq!(backend.current_step(), 0);
    }
}

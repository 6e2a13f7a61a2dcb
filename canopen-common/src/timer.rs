//! A cancellable deadline
//!
//! None of the engines read a clock. Callers pass the current time in microseconds to every
//! `process` call, and timers compare it against a stored deadline.

/// A one-shot deadline, measured in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline_us: Option<u64>,
}

impl Timer {
    /// Create a disarmed timer
    pub const fn new() -> Self {
        Self { deadline_us: None }
    }

    /// Arm the timer to expire `duration_us` after `now_us`, replacing any previous deadline
    pub fn start(&mut self, now_us: u64, duration_us: u64) {
        self.deadline_us = Some(now_us.saturating_add(duration_us));
    }

    /// Disarm the timer
    ///
    /// Returns true if the timer was armed. A second cancel returns false.
    pub fn cancel(&mut self) -> bool {
        self.deadline_us.take().is_some()
    }

    /// True while a deadline is set
    pub fn is_armed(&self) -> bool {
        self.deadline_us.is_some()
    }

    /// The current deadline, if armed
    pub fn deadline(&self) -> Option<u64> {
        self.deadline_us
    }

    /// True if armed and the deadline has been reached
    pub fn expired(&self, now_us: u64) -> bool {
        matches!(self.deadline_us, Some(deadline) if now_us >= deadline)
    }

    /// Disarm the timer and return true if it has expired
    ///
    /// An expired timer is reported exactly once.
    pub fn take_expired(&mut self, now_us: u64) -> bool {
        if self.expired(now_us) {
            self.deadline_us = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_reported_once() {
        let mut timer = Timer::new();
        assert!(!timer.take_expired(1000));
        timer.start(1000, 500);
        assert!(!timer.expired(1499));
        assert!(timer.expired(1500));
        assert!(timer.take_expired(1600));
        assert!(!timer.take_expired(1700));
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timer = Timer::new();
        timer.start(0, 10);
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.expired(100));
    }
}

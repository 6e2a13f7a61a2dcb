//! Periodic TIME stamp producer
use std::time::SystemTime;

use canopen_common::{messages::TimeStamp, CanMessage, Timer};

/// Broadcasts the wall clock time every `period_us`
///
/// The producer does not read the clock itself: the caller passes the current wall clock time to
/// [`process`](Self::process) along with the monotonic time used for scheduling.
#[derive(Debug)]
pub struct TimeProducer {
    period_us: u64,
    timer: Timer,
}

impl TimeProducer {
    /// Create a stopped producer
    pub fn new(period_us: u64) -> Self {
        Self {
            period_us,
            timer: Timer::new(),
        }
    }

    /// Begin sending. The first stamp is sent on the next call to `process`.
    pub fn start(&mut self, now_us: u64) {
        if self.period_us > 0 {
            self.timer.start(now_us, 0);
        }
    }

    /// Stop sending
    pub fn stop(&mut self) {
        self.timer.cancel();
    }

    /// Time of the next stamp
    pub fn next_deadline_us(&self) -> Option<u64> {
        self.timer.deadline()
    }

    /// Send a time stamp if one is due
    pub fn process(
        &mut self,
        now_us: u64,
        wall_clock: SystemTime,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<TimeStamp> {
        if !self.timer.take_expired(now_us) {
            return None;
        }
        self.timer.start(now_us, self.period_us);
        let stamp = TimeStamp::from_system_time(wall_clock);
        send(stamp.into());
        Some(stamp)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use canopen_common::messages::TIME_ID;

    use super::*;

    #[test]
    fn test_periodic_stamps() {
        let mut producer = TimeProducer::new(1_000_000);
        let mut sent = Vec::new();
        // 1984-01-02 00:00:01
        let wall = UNIX_EPOCH + Duration::from_secs(441_763_200 + 86_400 + 1);
        producer.start(0);
        let stamp = producer.process(0, wall, &mut |m| sent.push(m)).unwrap();
        assert_eq!(1, stamp.days);
        assert_eq!(1000, stamp.ms_after_midnight);
        assert!(producer.process(999_999, wall, &mut |m| sent.push(m)).is_none());
        assert!(producer.process(1_000_000, wall, &mut |m| sent.push(m)).is_some());
        assert_eq!(2, sent.len());
        assert_eq!(TIME_ID, sent[0].id());
        assert_eq!(&[0xE8, 0x03, 0, 0, 1, 0], sent[0].data());
    }
}

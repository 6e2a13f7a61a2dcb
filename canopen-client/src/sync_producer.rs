//! Periodic SYNC producer
use canopen_common::{messages::SyncObject, CanMessage, Timer};

/// Default counter overflow value
pub const DEFAULT_SYNC_OVERFLOW: u8 = 240;

/// Sends a SYNC object every `period_us`
///
/// With a non-zero overflow value, each SYNC carries a counter which starts at 1 and wraps back to
/// 1 after reaching the overflow value. With an overflow of 0 the SYNC has no payload.
#[derive(Debug)]
pub struct SyncProducer {
    period_us: u64,
    overflow: u8,
    count: u8,
    timer: Timer,
}

impl SyncProducer {
    /// Create a producer
    ///
    /// Overflow values above 240 are clamped to 240. The first SYNC is sent one period after
    /// [`start`](Self::start).
    pub fn new(period_us: u64, overflow: u8) -> Self {
        Self {
            period_us,
            overflow: overflow.min(DEFAULT_SYNC_OVERFLOW),
            count: 0,
            timer: Timer::new(),
        }
    }

    /// The configured period
    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Begin sending SYNCs. The counter restarts at 1.
    pub fn start(&mut self, now_us: u64) {
        self.count = 0;
        if self.period_us > 0 {
            self.timer.start(now_us, self.period_us);
        }
    }

    /// Stop sending SYNCs
    pub fn stop(&mut self) {
        self.timer.cancel();
    }

    /// True while started
    pub fn is_running(&self) -> bool {
        self.timer.is_armed()
    }

    /// Time of the next SYNC
    pub fn next_deadline_us(&self) -> Option<u64> {
        self.timer.deadline()
    }

    fn next_object(&mut self) -> SyncObject {
        if self.overflow == 0 {
            return SyncObject::default();
        }
        self.count = if self.count >= self.overflow {
            1
        } else {
            self.count + 1
        };
        SyncObject::new(self.count)
    }

    /// Send a SYNC if one is due
    ///
    /// Returns the object sent. A late call sends a single SYNC and schedules the next one a full
    /// period later.
    pub fn process(
        &mut self,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<SyncObject> {
        let deadline = self.timer.deadline()?;
        if now_us < deadline {
            return None;
        }
        let base = if deadline + self.period_us > now_us {
            deadline
        } else {
            now_us
        };
        self.timer.start(base, self.period_us);
        let sync = self.next_object();
        send(sync.into());
        Some(sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_wraps() {
        let mut producer = SyncProducer::new(1000, 3);
        let mut sent = Vec::new();
        producer.start(0);
        for i in 1..=7 {
            producer.process(i * 1000, &mut |msg| sent.push(msg));
        }
        let counts: Vec<u8> = sent.iter().map(|m| m.data()[0]).collect();
        assert_eq!(vec![1, 2, 3, 1, 2, 3, 1], counts);
    }

    #[test]
    fn test_no_counter() {
        let mut producer = SyncProducer::new(1000, 0);
        let mut sent = Vec::new();
        producer.start(0);
        assert!(producer.process(999, &mut |msg| sent.push(msg)).is_none());
        assert_eq!(
            Some(SyncObject { count: None }),
            producer.process(1000, &mut |msg| sent.push(msg))
        );
        assert_eq!(0, sent[0].data().len());
        assert_eq!(Some(2000), producer.next_deadline_us());
    }

    #[test]
    fn test_stopped_sends_nothing() {
        let mut producer = SyncProducer::new(1000, 0);
        let mut count = 0;
        assert!(producer.process(5000, &mut |_| count += 1).is_none());
        producer.start(0);
        producer.stop();
        assert!(producer.process(5000, &mut |_| count += 1).is_none());
        assert_eq!(0, count);
    }
}

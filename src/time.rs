use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn base() -> Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    *BASE.get_or_init(Instant::now)
}

/// Monotonic clock in seconds. The epoch is the first call in the process.
pub fn now() -> f64 {
    base().elapsed().as_secs_f64()
}

/// Wall clock, unix seconds.
pub fn unix_time() -> i32 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i32,
        Err(_) => 0,
    }
}

/// A point on the monotonic clock, in seconds. The default value is "never
/// set" and compares before every real timestamp.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
pub struct Timestamp {
    at: f64,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp { at: now() }
    }

    pub fn at(seconds: f64) -> Timestamp {
        Timestamp { at: seconds }
    }

    /// `seconds` from now.
    pub fn in_(seconds: f64) -> Timestamp {
        Timestamp { at: now() + seconds }
    }

    pub fn seconds(&self) -> f64 {
        self.at
    }

    /// Seconds left until this timestamp; negative when in the past.
    pub fn remaining(&self) -> f64 {
        self.at - now()
    }

    pub fn is_in_past(&self) -> bool {
        self.at <= now()
    }

    pub fn is_never(&self) -> bool {
        self.at == 0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn timestamp_ordering() {
        let soon = Timestamp::in_(0.5);
        let later = Timestamp::in_(1.5);
        assert!(soon < later);
        assert!(!soon.is_in_past());
        assert!(Timestamp::at(0.0).is_never());
    }
}

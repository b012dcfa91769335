//! Wall-clock helpers.
//!
//! Membership records age by whole seconds; block timestamps use
//! milliseconds. Both read the system clock directly; monotonic time is only
//! used for in-process deadlines (probe queues, pending-operation waits).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
pub fn unix_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod clock_tests {
    use super::*;

    #[test]
    fn millis_track_secs() {
        let s = unix_secs() as u64;
        let ms = unix_millis();
        assert!(ms / 1000 >= s);
        assert!(ms / 1000 - s <= 1);
    }
}

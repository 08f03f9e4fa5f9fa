//! Foundational low-level utilities shared across Sift crates.
//!
//! Provides atomic file-write helpers used by scheduler state snapshots and
//! time/duration utilities used by interval clamping and record bookkeeping.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{clamp_duration, current_unix_timestamp, current_unix_timestamp_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use std::time::Duration;

    use super::*;

    #[test]
    fn time_utils_round_trip_bounds() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn clamp_duration_respects_bounds() {
        let min = Duration::from_secs(300);
        let max = Duration::from_secs(86_400);
        assert_eq!(clamp_duration(Duration::from_secs(60), min, max), min);
        assert_eq!(clamp_duration(Duration::from_secs(100_000), min, max), max);
        assert_eq!(
            clamp_duration(Duration::from_secs(21_600), min, max),
            Duration::from_secs(21_600)
        );
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("snapshot.json");
        write_text_atomic(&path, "{\"ok\":true}").expect("write");
        assert_eq!(read_to_string(&path).expect("read"), "{\"ok\":true}");
    }

    #[test]
    fn write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        assert_eq!(read_to_string(&path).expect("read"), "second");
    }
}

// crates/dualcast-core/src/time.rs
//
// Timebase conversion helpers shared by the demuxer, compositor, and feeder.
// Canonical source for the `value * 1_000_000 / timescale` rule in spec.md
// §4.2 — previously this conversion was duplicated ad hoc at each call site
// during early drafts of the demuxer; it now lives in one place so every
// component agrees on rounding behavior.

/// Convert a container-timescale value (`cts` or `duration`) to microseconds.
///
/// `timescale` is the track's declared ticks-per-second. Truncates rather
/// than rounds, matching the teacher's `pts_to_secs`/`ts_to_pts` style of
/// integer timebase math in `decode.rs`.
pub fn to_micros(value: i64, timescale: u32) -> i64 {
    debug_assert!(timescale > 0, "timescale must be positive");
    value * 1_000_000 / timescale as i64
}

/// Inverse of [`to_micros`] — convert microseconds back into a timescale tick
/// count. Used when a host-provided time (e.g. `sink.current_time_us`) needs
/// to be compared against container-native values.
pub fn from_micros(micros: i64, timescale: u32) -> i64 {
    debug_assert!(timescale > 0, "timescale must be positive");
    micros * timescale as i64 / 1_000_000
}

/// Format a duration in seconds as `MM:SS:FF` (minutes, seconds, frames at 30 fps).
///
/// Used by the demo harness when printing host event traces.
pub fn format_time(s: f64) -> String {
    let m = (s / 60.0) as u32;
    let sc = (s % 60.0) as u32;
    let fr = ((s * 30.0) as u32) % 30;
    format!("{m:02}:{sc:02}:{fr:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip_at_common_timescales() {
        for timescale in [1000u32, 90_000, 44_100, 48_000] {
            let value = timescale as i64 * 3; // exactly 3 seconds worth of ticks
            let us = to_micros(value, timescale);
            assert_eq!(us, 3_000_000);
            assert_eq!(from_micros(us, timescale), value);
        }
    }

    #[test]
    fn format_time_matches_spec_examples() {
        assert_eq!(format_time(0.0), "00:00:00");
        assert_eq!(format_time(61.5), "01:01:15");
    }
}

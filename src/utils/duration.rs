//! Duration formatting utilities.
//!
//! This module renders elapsed trace time the way the serial monitor prints
//! clock values, so report readers can compare them at a glance.

use chrono::TimeDelta;

/// Format a duration as `H:MM:SS.mmm`
///
/// Hours are not wrapped at 24. Negative durations get a leading `-`.
///
/// # Examples
/// ```
/// use chrono::TimeDelta;
/// use meshtrace::utils::duration::format_elapsed;
///
/// assert_eq!(format_elapsed(TimeDelta::milliseconds(5_250)), "0:00:05.250");
/// assert_eq!(format_elapsed(TimeDelta::hours(26)), "26:00:00.000");
/// ```
pub fn format_elapsed(duration: TimeDelta) -> String {
    let sign = if duration < TimeDelta::zero() { "-" } else { "" };
    let duration = duration.abs();

    let total_millis = duration.num_milliseconds();
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let seconds = (total_millis / 1_000) % 60;
    let millis = total_millis % 1_000;

    format!("{}{}:{:02}:{:02}.{:03}", sign, hours, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(TimeDelta::zero()), "0:00:00.000");
        assert_eq!(format_elapsed(TimeDelta::microseconds(1_999)), "0:00:00.001");
        assert_eq!(format_elapsed(TimeDelta::seconds(3_661)), "1:01:01.000");
        assert_eq!(format_elapsed(TimeDelta::milliseconds(-1_500)), "-0:00:01.500");
    }
}

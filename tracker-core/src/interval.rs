//! Duration string codec for persisted configuration values.
//!
//! Intervals travel as `[D ]HH:MM:SS` text: an optional day count separated
//! by a single space, then two-digit zero-padded hours, minutes, and seconds.
//! The codec is two-way consistent: `parse(&format(s))` returns `s` for every
//! non-negative second count. The parser composes `winnow` combinators over
//! the raw string.

use core::fmt::{self, Write as _};

use heapless::String;
use winnow::combinator::{opt, terminated};
use winnow::prelude::*;
use winnow::token::take_while;

/// Seconds per day, used for the optional day segment.
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Longest rendered interval: 20 digits of days, the separator, and `HH:MM:SS`.
pub const MAX_INTERVAL_TEXT: usize = 32;

/// Bounded string type holding a rendered interval.
pub type IntervalString = String<MAX_INTERVAL_TEXT>;

/// Reasons an interval string is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseIntervalError {
    /// Input does not match `[D ]HH:MM:SS` (including fewer than two colons).
    Syntax,
    /// Hours segment outside `0..=23`.
    HoursOutOfRange,
    /// Minutes segment outside `0..=59`.
    MinutesOutOfRange,
    /// Seconds segment outside `0..=59`.
    SecondsOutOfRange,
    /// Day count whose second total does not fit in `u64`.
    DaysOutOfRange,
}

impl fmt::Display for ParseIntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseIntervalError::Syntax => f.write_str("expected `[days ]HH:MM:SS`"),
            ParseIntervalError::HoursOutOfRange => f.write_str("hours must be 0-23"),
            ParseIntervalError::MinutesOutOfRange => f.write_str("minutes must be 0-59"),
            ParseIntervalError::SecondsOutOfRange => f.write_str("seconds must be 0-59"),
            ParseIntervalError::DaysOutOfRange => f.write_str("day count too large"),
        }
    }
}

/// Renders `total_secs` in the canonical `[D ]HH:MM:SS` form.
///
/// The day prefix is emitted only when the day count is non-zero; zero-day
/// values never carry a `0 ` prefix.
#[must_use]
pub fn format(total_secs: u64) -> IntervalString {
    let days = total_secs / SECS_PER_DAY;
    let hours = (total_secs / 3_600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;

    let mut out = IntervalString::new();
    if days > 0 {
        // Capacity is sized for the largest u64 day count; writes cannot fail.
        let _ = write!(out, "{days} ");
    }
    let _ = write!(out, "{hours:02}:{minutes:02}:{seconds:02}");
    out
}

/// Parses an interval string back into a second count.
///
/// Leading and trailing spaces are trimmed before matching. On failure the
/// caller's previous value is simply left alone; no partial result escapes.
pub fn parse(text: &str) -> Result<u64, ParseIntervalError> {
    let trimmed = text.trim_matches(' ');
    let raw = fields.parse(trimmed).map_err(|_| ParseIntervalError::Syntax)?;

    if raw.hours > 23 {
        return Err(ParseIntervalError::HoursOutOfRange);
    }
    if raw.minutes > 59 {
        return Err(ParseIntervalError::MinutesOutOfRange);
    }
    if raw.seconds > 59 {
        return Err(ParseIntervalError::SecondsOutOfRange);
    }

    let clock_secs = raw.hours * 3_600 + raw.minutes * 60 + raw.seconds;
    raw.days
        .checked_mul(SECS_PER_DAY)
        .and_then(|day_secs| day_secs.checked_add(clock_secs))
        .ok_or(ParseIntervalError::DaysOutOfRange)
}

struct RawFields {
    days: u64,
    hours: u64,
    minutes: u64,
    seconds: u64,
}

fn number(input: &mut &str) -> ModalResult<u64> {
    take_while(1.., |c: char| c.is_ascii_digit())
        .try_map(str::parse::<u64>)
        .parse_next(input)
}

fn fields(input: &mut &str) -> ModalResult<RawFields> {
    let days = opt(terminated(number, ' ')).parse_next(input)?;
    let hours = number.parse_next(input)?;
    ':'.parse_next(input)?;
    let minutes = number.parse_next(input)?;
    ':'.parse_next(input)?;
    let seconds = number.parse_next(input)?;

    Ok(RawFields {
        days: days.unwrap_or(0),
        hours,
        minutes,
        seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::{ParseIntervalError, format, parse};

    #[test]
    fn zero_renders_without_day_prefix() {
        assert_eq!(format(0).as_str(), "00:00:00");
    }

    #[test]
    fn sub_day_values_render_padded() {
        assert_eq!(format(5).as_str(), "00:00:05");
        assert_eq!(format(3_600 + 2 * 60 + 3).as_str(), "01:02:03");
        assert_eq!(format(86_399).as_str(), "23:59:59");
    }

    #[test]
    fn day_prefix_appears_from_one_day_up() {
        assert_eq!(format(86_400).as_str(), "1 00:00:00");
        assert_eq!(format(2 * 86_400 + 12 * 3_600 + 30 * 60 + 45).as_str(), "2 12:30:45");
    }

    #[test]
    fn parse_accepts_day_segment() {
        assert_eq!(parse("1 12:30:45"), Ok(86_400 + 12 * 3_600 + 30 * 60 + 45));
        assert_eq!(parse("00:00:00"), Ok(0));
        assert_eq!(parse("  23:59:59  "), Ok(86_399));
    }

    #[test]
    fn parse_rejects_out_of_range_segments() {
        assert_eq!(parse("25:00:00"), Err(ParseIntervalError::HoursOutOfRange));
        assert_eq!(parse("12:60:00"), Err(ParseIntervalError::MinutesOutOfRange));
        assert_eq!(parse("12:00:60"), Err(ParseIntervalError::SecondsOutOfRange));
    }

    #[test]
    fn parse_rejects_malformed_text() {
        assert_eq!(parse(""), Err(ParseIntervalError::Syntax));
        assert_eq!(parse("12:30"), Err(ParseIntervalError::Syntax));
        assert_eq!(parse("1200"), Err(ParseIntervalError::Syntax));
        assert_eq!(parse("12:30:45:10"), Err(ParseIntervalError::Syntax));
        assert_eq!(parse("a 12:30:45"), Err(ParseIntervalError::Syntax));
        assert_eq!(parse("12:3x:45"), Err(ParseIntervalError::Syntax));
        assert_eq!(parse("-1 00:00:00"), Err(ParseIntervalError::Syntax));
    }

    #[test]
    fn parse_rejects_day_counts_past_u64_seconds() {
        assert_eq!(
            parse("300000000000000 00:00:00"),
            Err(ParseIntervalError::DaysOutOfRange)
        );
        assert_eq!(
            parse("18446744073709551615 00:00:01"),
            Err(ParseIntervalError::DaysOutOfRange)
        );
        // Largest day count whose seconds still fit, one second past the limit.
        assert_eq!(
            parse("213503982334601 07:00:16"),
            Err(ParseIntervalError::DaysOutOfRange)
        );
    }

    #[test]
    fn round_trips_the_largest_representable_interval() {
        assert_eq!(parse(format(u64::MAX).as_str()), Ok(u64::MAX));
        assert_eq!(parse("213503982334601 07:00:15"), Ok(u64::MAX));
    }

    #[test]
    fn round_trips_low_range_densely() {
        for secs in 0..100_000 {
            assert_eq!(parse(format(secs).as_str()), Ok(secs), "secs={secs}");
        }
    }

    #[test]
    fn round_trips_full_property_range_strided() {
        let mut secs: u64 = 0;
        while secs <= 9_999_999 {
            assert_eq!(parse(format(secs).as_str()), Ok(secs), "secs={secs}");
            secs += 997;
        }
        for secs in [86_399, 86_400, 86_401, 9_999_999, u64::from(u32::MAX)] {
            assert_eq!(parse(format(secs).as_str()), Ok(secs), "secs={secs}");
        }
    }
}

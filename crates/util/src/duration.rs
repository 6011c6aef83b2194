//! Compact duration literals used in configuration (`15s`, `10m`, `1h`, `600`).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("invalid duration '{0}': expected a whole number followed by s, m, or h")]
    Invalid(String),
    #[error("unsupported duration unit '{unit}' in '{raw}'")]
    UnsupportedUnit { raw: String, unit: char },
}

/// Parses a whole-number duration with an optional `s`, `m`, or `h` suffix.
///
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let trimmed = raw.trim();
    let Some(last_character) = trimmed.chars().last() else {
        return Err(DurationParseError::Empty);
    };

    if !last_character.is_ascii_alphabetic() {
        let seconds: u64 = trimmed.parse().map_err(|_| DurationParseError::Invalid(raw.to_string()))?;
        return Ok(Duration::from_secs(seconds));
    }

    let number = &trimmed[..trimmed.len() - 1];
    let value: u64 = number.trim().parse().map_err(|_| DurationParseError::Invalid(raw.to_string()))?;
    let multiplier = match last_character {
        's' | 'S' => 1,
        'm' | 'M' => 60,
        'h' | 'H' => 3600,
        unit => {
            return Err(DurationParseError::UnsupportedUnit {
                raw: raw.to_string(),
                unit,
            });
        }
    };
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| DurationParseError::Invalid(raw.to_string()))
}

/// Renders a duration in the largest unit that divides it evenly.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds != 0 && seconds % 3600 == 0 {
        format!("{}h", seconds / 3600)
    } else if seconds != 0 && seconds % 60 == 0 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixes_and_bare_seconds() {
        assert_eq!(parse_duration("15s"), Ok(Duration::from_secs(15)));
        assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration(" 1h "), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("600"), Ok(Duration::from_secs(600)));
    }

    #[test]
    fn rejects_malformed_values() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert!(matches!(parse_duration("1.5m"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(parse_duration("-5s"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(
            parse_duration("3d"),
            Err(DurationParseError::UnsupportedUnit { unit: 'd', .. })
        ));
    }

    #[test]
    fn formats_in_largest_even_unit() {
        assert_eq!(format_duration(Duration::from_secs(1200)), "20m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(15)), "15s");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}

//! Bounded environment variable parsing
//!
//! Values that are missing, unparsable or outside the allowed range fall back
//! to the supplied default. Bad values are logged, never fatal.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Base directory for controller configuration files (TLS material etc.)
pub const ENV_APP_CONFIG_PATH: &str = "KESTREL_APP_CONF_PATH";
pub const DEFAULT_APP_CONFIG_PATH: &str = "/app/config";

/// Number of controller replicas expected to run concurrently
pub const ENV_CONTROLLER_REPLICAS: &str = "KESTREL_CONTROLLER_REPLICAS";
/// Explicit shard index of this replica
pub const ENV_CONTROLLER_SHARD: &str = "KESTREL_CONTROLLER_SHARD";
/// Default for the application resync period
pub const ENV_RECONCILIATION_TIMEOUT: &str = "KESTREL_RECONCILIATION_TIMEOUT";

/// Read a string variable, falling back to `default` when unset or empty
pub fn string_from_env(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Read a bounded number from the environment
pub fn parse_num_from_env<T>(name: &str, default: T, min: T, max: T) -> T
where
    T: FromStr + PartialOrd + Copy + Display,
{
    parse_num(name, std::env::var(name).ok().as_deref(), default, min, max)
}

/// Parse a bounded number from an optional raw value
pub fn parse_num<T>(name: &str, raw: Option<&str>, default: T, min: T, max: T) -> T
where
    T: FromStr + PartialOrd + Copy + Display,
{
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };

    match raw.parse::<T>() {
        Ok(value) if value < min => {
            warn!(
                "Value of {} is {}, which is less than minimum {}; using default {}",
                name, value, min, default
            );
            default
        }
        Ok(value) if value > max => {
            warn!(
                "Value of {} is {}, which is greater than maximum {}; using default {}",
                name, value, max, default
            );
            default
        }
        Ok(value) => value,
        Err(_) => {
            warn!(
                "Could not parse '{}' as a number from {}; using default {}",
                raw, name, default
            );
            default
        }
    }
}

/// Read a bounded duration from the environment
pub fn parse_duration_from_env(
    name: &str,
    default: Duration,
    min: Duration,
    max: Duration,
) -> Duration {
    parse_bounded_duration(name, std::env::var(name).ok().as_deref(), default, min, max)
}

/// Parse a bounded duration from an optional raw value
pub fn parse_bounded_duration(
    name: &str,
    raw: Option<&str>,
    default: Duration,
    min: Duration,
    max: Duration,
) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };

    match parse_duration(raw) {
        Some(value) if value < min || value > max => {
            warn!(
                "Value of {} is {:?}, outside [{:?}, {:?}]; using default {:?}",
                name, value, min, max, default
            );
            default
        }
        Some(value) => value,
        None => {
            warn!(
                "Could not parse '{}' as a duration from {}; using default {:?}",
                raw, name, default
            );
            default
        }
    }
}

/// Parse a duration such as "180", "30s", "10m", "24h" or "1h30m"
///
/// A bare number is interpreted as seconds. Values too large for a
/// `Duration` are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }

        let unit_secs = match c {
            'd' => 86400.0,
            'h' => 3600.0,
            's' => 1.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            _ => return None,
        };

        let value: f64 = num.parse().ok()?;
        let part = Duration::try_from_secs_f64(value * unit_secs).ok()?;
        total = total.checked_add(part)?;
        num.clear();
    }

    // Trailing digits without a unit are ambiguous
    if !num.is_empty() {
        return None;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_num_default_when_missing() {
        assert_eq!(parse_num("X", None, 0i64, 0, i32::MAX as i64), 0);
        assert_eq!(parse_num("X", Some("  "), -1i64, -100, 100), -1);
    }

    #[test]
    fn test_parse_num_in_range() {
        assert_eq!(parse_num("X", Some("3"), 0i64, 0, 10), 3);
        assert_eq!(parse_num("X", Some("-5"), -1i64, -10, 10), -5);
    }

    #[test]
    fn test_parse_num_out_of_range_or_garbage() {
        assert_eq!(parse_num("X", Some("11"), 2i64, 0, 10), 2);
        assert_eq!(parse_num("X", Some("-1"), 0i64, 0, 10), 0);
        assert_eq!(parse_num("X", Some("three"), 1i64, 0, 10), 1);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("180"), Some(Duration::from_secs(180)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("24h0m0s"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("1h30"), None);
        assert_eq!(parse_duration("5y"), None);
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(parse_duration("99999999999999999999h"), None);
        assert_eq!(parse_duration("99999999999999999999"), None);
        // Each part fits, the sum does not
        assert_eq!(
            parse_duration("10000000000000000000s10000000000000000000s"),
            None
        );
    }

    #[test]
    fn test_bounded_duration_falls_back() {
        let default = Duration::from_secs(180);
        let max = Duration::from_secs(i32::MAX as u64);
        let parse = |raw| parse_bounded_duration("X", raw, default, Duration::ZERO, max);

        assert_eq!(parse(None), default);
        assert_eq!(parse(Some("60")), Duration::from_secs(60));
        assert_eq!(parse(Some("99999999999999999999h")), default);
        assert_eq!(parse(Some("3000000000")), default);
        assert_eq!(parse(Some("later")), default);
    }

    #[test]
    fn test_string_from_env_default() {
        assert_eq!(
            string_from_env("KESTREL_TEST_SURELY_UNSET_VARIABLE", "/app/config"),
            "/app/config"
        );
    }
}

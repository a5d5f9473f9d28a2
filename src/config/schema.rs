//! Configuration schema validation and helpers

use std::time::Duration;

/// Parse a duration string like "200ms", "1s", "1m30s".
///
/// Units: `ms`, `s`, `m`, `h`, `d`. A zero total is allowed ("0ms"),
/// debounces use it to mean "act immediately".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut current_num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }

        let num: u64 = current_num
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;
        current_num.clear();

        total += match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(num)
            }
            's' => Duration::from_secs(num),
            'm' => Duration::from_secs(num * 60),
            'h' => Duration::from_secs(num * 3600),
            'd' => Duration::from_secs(num * 86400),
            _ => return Err(format!("Unknown duration unit: {}", c)),
        };
    }

    if !current_num.is_empty() {
        return Err(format!("Missing unit in duration: {}", s));
    }

    Ok(total)
}

/// Check that a scalar voice parameter lies inside `[min, max]`.
pub fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<(), String> {
    if !value.is_finite() || value < min || value > max {
        return Err(format!(
            "{} must be between {} and {}, got: {}",
            name, min, max, value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_parse_duration_millis() {
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("1s500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0ms").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("100").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_check_range() {
        assert!(check_range("rate", 1.0, 0.0, 2.0).is_ok());
        assert!(check_range("rate", 2.5, 0.0, 2.0).is_err());
        assert!(check_range("volume", f32::NAN, 0.0, 1.0).is_err());
    }
}

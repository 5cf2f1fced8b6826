//! Human-readable duration parsing and formatting.
//!
//! Rule files express cadences as strings like `"1m"`, `"2h30m"`, or `"90s"`.
//! [`parse_duration`] accepts combined day/hour/minute/second components;
//! a bare number is treated as seconds. The [`serde_duration`] module plugs
//! these into serde so schema fields accept either form.

use std::time::Duration;

/// Parse a human-readable duration string.
///
/// Supports components `Xd`, `Xh`, `Xm`, `Xs`, combinable ("1d12h", "2h30m").
/// A bare number ("300") is seconds. Returns `None` for empty or malformed
/// input, including trailing digits after a unit ("30m15").
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            match ch {
                'd' => total_secs += n * 86_400,
                'h' => total_secs += n * 3_600,
                'm' => total_secs += n * 60,
                's' => total_secs += n,
                _ => return None,
            }
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        if found_unit {
            // Ambiguous trailing digits after a unit component.
            return None;
        }
        total_secs += num_buf.parse::<u64>().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}

/// Format a duration as the shortest combined component string ("2h30m").
///
/// Zero renders as `"0s"`. Sub-second precision is dropped.
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, label) in [(86_400, 'd'), (3_600, 'h'), (60, 'm'), (1, 's')] {
        if secs >= unit {
            out.push_str(&format!("{}{}", secs / unit, label));
            secs %= unit;
        }
    }
    out
}

/// Serde adapter: serialize as `"2m"`-style strings, deserialize from either
/// a string or a raw number of seconds.
pub mod serde_duration {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_duration, parse_duration};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        match Repr::deserialize(de)? {
            Repr::Seconds(n) => Ok(Duration::from_secs(n)),
            Repr::Text(s) => parse_duration(&s)
                .ok_or_else(|| D::Error::custom(format!("invalid duration: {:?}", s))),
        }
    }

    /// `Option<Duration>` variant for optional schema fields.
    pub mod option {
        use std::time::Duration;

        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        use super::super::{format_duration, parse_duration};
        use super::Repr;

        pub fn serialize<S: Serializer>(
            d: &Option<Duration>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => ser.serialize_some(&format_duration(*d)),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<Duration>, D::Error> {
            match Option::<Repr>::deserialize(de)? {
                None => Ok(None),
                Some(Repr::Seconds(n)) => Ok(Some(Duration::from_secs(n))),
                Some(Repr::Text(s)) => parse_duration(&s)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid duration: {:?}", s))),
            }
        }
    }
}

use std::fmt;
use std::sync::OnceLock;

use regex_lite::{Regex, RegexBuilder};
use serde::de::{Unexpected, Visitor};
use serde::{Deserialize, Deserializer};

/// A duration given either as a number of seconds or as a string like `1d 12h 30m 15s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const fn from_secs(seconds: u64) -> Self {
        Self(std::time::Duration::from_secs(seconds))
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.as_secs())
    }
}

/// Parses the `1d 2h 3m 4s` notation. Every component is optional, but at least one is
/// required. Returns `Ok(None)` if the string does not follow the notation.
fn parse_duration(s: &str) -> Result<Option<u64>, String> {
    static REGEXP: OnceLock<Regex> = OnceLock::new();

    let regexp = REGEXP.get_or_init(|| {
        RegexBuilder::new(
            r"
            ^
            (?:(?<days>    \d+)d)? \s*
            (?:(?<hours>   \d+)h)? \s*
            (?:(?<minutes> \d+)m)? \s*
            (?:(?<seconds> \d+)s)?
            $",
        )
        .ignore_whitespace(true)
        .build()
        .unwrap()
    });

    let Some(captures) = regexp.captures(s.trim()) else {
        return Ok(None);
    };

    let mut total = 0u64;
    let mut matched = false;

    for (name, unit) in [("days", 86400), ("hours", 3600), ("minutes", 60), ("seconds", 1)] {
        let Some(value) = captures.name(name).map(|m| m.as_str()) else {
            continue;
        };

        matched = true;
        let value = value
            .parse::<u64>()
            .map_err(|e| format!("could not parse {name} (`{value}`): {e}"))?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| secs.checked_add(total))
            .ok_or_else(|| format!("duration `{s}` is too large"))?;
    }

    Ok(matched.then_some(total))
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a duration")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_u64(v.try_into().map_err(E::custom)?)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match parse_duration(v) {
                    Ok(Some(secs)) => Ok(Duration::from_secs(secs)),
                    Ok(None) => Err(E::invalid_value(Unexpected::Str(v), &"a duration")),
                    Err(e) => Err(E::custom(e)),
                }
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}

//! Human-readable data rates and durations (e.g. `10Gbps`, `1ns`)

use anyhow::{Context, anyhow, bail};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// A data rate, in bits per second
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataRate {
    bps: u64,
}

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self { bps }
    }

    pub fn bps(&self) -> u64 {
        self.bps
    }

    /// The time it takes to serialize `bytes` onto a medium running at this rate, rounded up to
    /// the next nanosecond
    pub fn transmission_time(&self, bytes: usize) -> Duration {
        if self.bps == 0 {
            return Duration::MAX;
        }

        let bits = (bytes as u128).saturating_mul(8);
        let nanos = (bits * 1_000_000_000).div_ceil(self.bps as u128);
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}bps", self.bps)
    }
}

impl FromStr for DataRate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_number(s)?;
        let multiplier: f64 = match unit {
            "bps" | "b/s" => 1.0,
            "Bps" | "B/s" => 8.0,
            "kbps" | "Kbps" | "kb/s" | "Kb/s" => 1e3,
            "kBps" | "KBps" | "kB/s" | "KB/s" => 8e3,
            "Mbps" | "Mb/s" => 1e6,
            "MBps" | "MB/s" => 8e6,
            "Gbps" | "Gb/s" => 1e9,
            "GBps" | "GB/s" => 8e9,
            "" => bail!("data rate `{s}` has no unit (e.g. `5Mbps`)"),
            other => bail!("unknown data rate unit `{other}`"),
        };

        Ok(Self {
            bps: (value * multiplier).round() as u64,
        })
    }
}

/// Parses a duration such as `1ns`, `250us`, `5ms`, `2s` or `1min`
///
/// A missing unit is interpreted as seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let (value, unit) = split_number(s)?;
    let seconds_per_unit = match unit {
        "ns" => 1e-9,
        "us" => 1e-6,
        "ms" => 1e-3,
        "" | "s" => 1.0,
        "min" => 60.0,
        "h" => 3600.0,
        other => bail!("unknown time unit `{other}`"),
    };

    let nanos = (value * seconds_per_unit * 1e9).round();
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        bail!("duration `{s}` is out of range");
    }

    Ok(Duration::from_nanos(nanos as u64))
}

fn split_number(s: &str) -> anyhow::Result<(f64, &str)> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == 'e' || c == '-' || c == '+'))
        .unwrap_or(s.len());

    // `e` can only be part of the number if it is followed by a digit or sign
    let split_at = match s[..split_at].rfind('e') {
        Some(e) if e + 1 == split_at => e,
        _ => split_at,
    };

    let (number, unit) = s.split_at(split_at);
    if number.is_empty() {
        return Err(anyhow!("`{s}` does not start with a number"));
    }

    let value: f64 = number
        .parse()
        .with_context(|| format!("`{number}` is not a valid number"))?;
    if value < 0.0 || !value.is_finite() {
        bail!("`{s}` must be a non-negative finite value");
    }

    Ok((value, unit.trim()))
}

#[test]
fn test_parse_data_rate() {
    let cases = [
        ("10Gbps", 10_000_000_000),
        ("5Mbps", 5_000_000),
        ("1.5Mbps", 1_500_000),
        ("100kbps", 100_000),
        ("1000bps", 1000),
        ("1KBps", 8000),
    ];

    for (input, bps) in cases {
        assert_eq!(DataRate::from_str(input).unwrap().bps(), bps, "{input}");
    }

    assert!(DataRate::from_str("10").is_err());
    assert!(DataRate::from_str("fast").is_err());
    assert!(DataRate::from_str("10Tbps").is_err());
}

#[test]
fn test_parse_duration() {
    let cases = [
        ("1ns", Duration::from_nanos(1)),
        ("250us", Duration::from_micros(250)),
        ("5ms", Duration::from_millis(5)),
        ("2s", Duration::from_secs(2)),
        ("2", Duration::from_secs(2)),
        ("0.5ms", Duration::from_micros(500)),
        ("1min", Duration::from_secs(60)),
    ];

    for (input, expected) in cases {
        assert_eq!(parse_duration(input).unwrap(), expected, "{input}");
    }

    assert!(parse_duration("ms").is_err());
    assert!(parse_duration("5 parsecs").is_err());
}

#[test]
fn test_transmission_time() {
    let rate = DataRate::from_bps(8_000_000);
    assert_eq!(rate.transmission_time(1000), Duration::from_millis(1));

    // Rounded up to the next nanosecond
    let rate = DataRate::from_bps(10_000_000_000);
    assert_eq!(rate.transmission_time(1), Duration::from_nanos(1));
    assert_eq!(rate.transmission_time(442), Duration::from_nanos(354));
}

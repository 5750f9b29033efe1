use std::{collections::BTreeSet, fmt, str::FromStr};

use anyhow::{bail, Context};
use chrono::{NaiveTime, Timelike};

/// Which wall-clock minutes of the day may produce a persisted reading.
///
/// Each capture instant covers one whole minute: a raw sample taken at
/// `10:00:37` belongs to instant `10:00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Every top of the hour (minute 0).
    Hourly,
    /// A fixed set of instants, minute resolution.
    Instants(BTreeSet<NaiveTime>),
}

impl CapturePolicy {
    /// The capture instant `t` falls into, if any.
    pub fn instant_for(&self, t: NaiveTime) -> Option<NaiveTime> {
        let minute = truncate_to_minute(t);
        match self {
            CapturePolicy::Hourly => (minute.minute() == 0).then_some(minute),
            CapturePolicy::Instants(set) => set.get(&minute).copied(),
        }
    }

    /// Every instant of one day, ascending.
    pub fn instants(&self) -> Vec<NaiveTime> {
        match self {
            CapturePolicy::Hourly => (0..24)
                .filter_map(|h| NaiveTime::from_hms_opt(h, 0, 0))
                .collect(),
            CapturePolicy::Instants(set) => set.iter().copied().collect(),
        }
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Accepts `hourly` or a comma-separated list of `HH:MM` (or `HH:MM:SS`,
/// seconds ignored) instants, e.g. `10:00,14:00,17:00`.
impl FromStr for CapturePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("hourly") {
            return Ok(Self::Hourly);
        }

        let instants = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                NaiveTime::parse_from_str(part, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(part, "%H:%M"))
                    .map(truncate_to_minute)
                    .with_context(|| format!("capture instant must be HH:MM, got {part:?}"))
            })
            .collect::<anyhow::Result<BTreeSet<_>>>()?;

        if instants.is_empty() {
            bail!("capture policy needs 'hourly' or at least one HH:MM instant");
        }
        Ok(Self::Instants(instants))
    }
}

impl fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturePolicy::Hourly => f.write_str("hourly"),
            CapturePolicy::Instants(set) => {
                let parts: Vec<String> = set.iter().map(|t| t.format("%H:%M").to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

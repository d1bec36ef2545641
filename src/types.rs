// =============================================================================
// Shared types used across the Aurora chart engine
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Candle bucket width.  Exactly one is active per chart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl Interval {
    /// Every supported width, finest first.
    pub const ALL: [Interval; 6] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::OneHour,
        Interval::FourHours,
        Interval::OneDay,
    ];

    /// Width of one bucket in seconds.
    pub fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
        }
    }

    /// Short label used by the history endpoint and the dashboard.
    pub fn label(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    pub fn from_seconds(seconds: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|iv| iv.seconds() == seconds)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|iv| iv.label() == label)
    }

    /// The finest supported width.  Live trade updates are only merged into
    /// this interval; coarser ones follow the periodic snapshot refresh.
    pub fn finest() -> Self {
        Self::ALL[0]
    }

    pub fn is_finest(self) -> bool {
        self == Self::finest()
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::OneMinute
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Interval {
    type Err = String;

    /// Accepts either a label (`"5m"`) or a width in seconds (`"300"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(iv) = Self::from_label(s) {
            return Ok(iv);
        }
        s.parse::<i64>()
            .ok()
            .and_then(Self::from_seconds)
            .ok_or_else(|| format!("unsupported interval: {s}"))
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Labels and bare second counts are both accepted.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Label(String),
            Seconds(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Label(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Seconds(n) => Self::from_seconds(n)
                .ok_or_else(|| serde::de::Error::custom(format!("unsupported interval: {n}s"))),
        }
    }
}

/// State of the live trade-event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Connecting
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle phase of one sync orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Loading,
    Live,
    Degraded,
    Closed,
}

impl Default for SyncPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Live => write!(f, "Live"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

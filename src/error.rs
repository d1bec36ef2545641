// =============================================================================
// Chart engine errors
// =============================================================================
//
// Every variant is recovered inside the sync orchestrator.  The display layer
// never sees one; at worst it observes a stale or empty series.
// =============================================================================

/// Errors raised by the candle aggregation core and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartError {
    /// A trade event that cannot be bucketed (bad price). Dropped and logged.
    InvalidTrade(String),
    /// The snapshot pull failed. Triggers `Degraded` and a timed retry.
    Unavailable(String),
    /// The live channel failed. The subscription is reopened on restart only.
    Subscription(String),
}

impl std::fmt::Display for ChartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTrade(msg) => write!(f, "invalid_trade: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Subscription(msg) => write!(f, "subscription_error: {msg}"),
        }
    }
}

impl std::error::Error for ChartError {}

impl ChartError {
    /// Collapse an adapter-level `anyhow` chain into `Unavailable`, keeping
    /// every context layer in the message.
    pub fn unavailable(err: &anyhow::Error) -> Self {
        Self::Unavailable(format!("{err:#}"))
    }
}

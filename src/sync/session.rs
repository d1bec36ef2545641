// =============================================================================
// Chart Session - interval state machine
// =============================================================================
//
// Owns the one active orchestrator.  Switching interval closes the current
// run (timer, pull, subscription), blanks the chart, and starts a fresh run
// from Idle.  No interpolation between widths is attempted: the new series is
// whatever the next snapshot says.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::chart::ChartSurface;
use crate::exchange::HistorySource;
use crate::market_data::{Candle, LiveEventSource};
use crate::sync::{SyncOrchestrator, SyncSettings};
use crate::types::{ConnectionState, Interval, SyncPhase};

/// Coarse status for the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub symbol: String,
    pub interval: Option<Interval>,
    pub phase: SyncPhase,
    pub connection: ConnectionState,
    pub candles: usize,
}

/// The chart for a single market, handed to the display layer by reference.
pub struct ChartSession {
    settings: SyncSettings,
    history: Arc<dyn HistorySource>,
    live: Arc<dyn LiveEventSource>,
    surface: Option<Arc<dyn ChartSurface>>,
    active: Mutex<Option<SyncOrchestrator>>,
}

impl ChartSession {
    pub fn new(
        settings: SyncSettings,
        history: Arc<dyn HistorySource>,
        live: Arc<dyn LiveEventSource>,
    ) -> Self {
        Self {
            settings,
            history,
            live,
            surface: None,
            active: Mutex::new(None),
        }
    }

    pub fn with_surface(mut self, surface: Arc<dyn ChartSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.settings.symbol
    }

    /// Make `interval` the active width.
    ///
    /// Returns `false` (and does nothing) when it already is.  Must be called
    /// inside a Tokio runtime.
    pub fn set_interval(&self, interval: Interval) -> bool {
        let mut active = self.active.lock();

        if let Some(current) = active.as_ref() {
            if current.interval() == interval && !current.is_closed() {
                return false;
            }
        }

        let previous = active.take().map(|mut old| {
            old.close();
            old.interval()
        });

        // Never leave the old width's candles under the new label.
        if let Some(surface) = &self.surface {
            surface.set_series(&[]);
        }

        let next = SyncOrchestrator::start(
            self.settings.clone(),
            interval,
            Arc::clone(&self.history),
            Arc::clone(&self.live),
            self.surface.clone(),
        );
        info!(
            symbol = %self.symbol(),
            from = ?previous.map(|iv| iv.label()),
            to = %interval,
            session = %next.session_id(),
            "chart interval switched"
        );
        *active = Some(next);
        true
    }

    pub fn active_interval(&self) -> Option<Interval> {
        self.active.lock().as_ref().map(|o| o.interval())
    }

    /// Read-only snapshot of the displayed series.  Empty when no run is active.
    pub fn current_series(&self) -> Arc<Vec<Candle>> {
        self.active
            .lock()
            .as_ref()
            .map(|o| o.current_series())
            .unwrap_or_default()
    }

    pub fn status(&self) -> SessionStatus {
        let active = self.active.lock();
        match active.as_ref() {
            Some(o) => {
                let run = o.status();
                SessionStatus {
                    symbol: self.symbol().to_string(),
                    interval: Some(o.interval()),
                    phase: run.phase,
                    connection: run.connection,
                    candles: o.store().len(),
                }
            }
            None => SessionStatus {
                symbol: self.symbol().to_string(),
                interval: None,
                phase: SyncPhase::Idle,
                connection: ConnectionState::Closed,
                candles: 0,
            },
        }
    }

    /// Close the active run, if any.  The session can be restarted with
    /// [`set_interval`](Self::set_interval).
    pub fn shutdown(&self) {
        if let Some(mut run) = self.active.lock().take() {
            run.close();
        }
    }
}

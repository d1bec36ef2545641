// =============================================================================
// Sync Orchestrator - snapshot polling + live trades for one interval
// =============================================================================
//
// One orchestrator owns one candle store for one (symbol, interval) pair and
// drives it from three event sources inside a single task:
//
//   1. snapshot pulls completing  -> `replace` (always authoritative)
//   2. live trade notifications   -> `apply_trade` (finest interval only)
//   3. the pull timer             -> refresh in Live, retry in Degraded
//
// Handlers run to completion one at a time in dispatch order.  A pull in
// flight never blocks live processing: both are polled by the same select.
//
// Phases:  Idle -> Loading -> Live <-> Degraded, any -> Closed (terminal).
//
// The live subscription is opened on the first successful snapshot and at
// most once per orchestrator.  A failed subscription stays failed until the
// next interval switch or restart builds a fresh orchestrator.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chart::ChartSurface;
use crate::error::ChartError;
use crate::exchange::HistorySource;
use crate::market_data::bucketing::bucket_of;
use crate::market_data::{Candle, CandleSeriesStore, LiveEventSource, LiveNotification, TradeEvent};
use crate::types::{ConnectionState, Interval, SyncPhase};

type PullResult = Result<Vec<Candle>, ChartError>;

/// Knobs shared by every orchestrator of a session.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub symbol: String,
    /// Number of candles requested per snapshot.
    pub snapshot_limit: usize,
    /// Delay between a successful snapshot and the next refresh.
    pub refresh_period: Duration,
    /// Delay between a failed snapshot and the next attempt.
    pub retry_period: Duration,
}

/// Coarse, observable state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    pub phase: SyncPhase,
    pub connection: ConnectionState,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running orchestrator.  Dropping it tears the run down.
pub struct SyncOrchestrator {
    session_id: Uuid,
    interval: Interval,
    store: Arc<CandleSeriesStore>,
    status: Arc<RwLock<RunStatus>>,
    task: Option<JoinHandle<()>>,
}

impl SyncOrchestrator {
    /// Spawn a new run from `Idle`.  Must be called inside a Tokio runtime.
    pub fn start(
        settings: SyncSettings,
        interval: Interval,
        history: Arc<dyn HistorySource>,
        live: Arc<dyn LiveEventSource>,
        surface: Option<Arc<dyn ChartSurface>>,
    ) -> Self {
        let session_id = Uuid::new_v4();

        let mut store = CandleSeriesStore::new(settings.symbol.clone(), interval);
        if let Some(surface) = surface {
            store = store.with_surface(surface);
        }
        let store = Arc::new(store);

        let status = Arc::new(RwLock::new(RunStatus {
            phase: SyncPhase::Idle,
            connection: ConnectionState::Closed,
        }));

        let span = info_span!(
            "sync",
            session = %session_id,
            symbol = %store.symbol(),
            interval = %store.interval()
        );

        let run = SyncLoop {
            settings,
            interval,
            store: Arc::clone(&store),
            status: Arc::clone(&status),
            history,
            live,
            pending_pull: None,
            subscription: None,
            subscribed: false,
            next_pull_at: None,
            fitted: false,
            last_trade: None,
        };
        let task = tokio::spawn(run.run().instrument(span));

        Self {
            session_id,
            interval,
            store,
            status,
            task: Some(task),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn store(&self) -> &Arc<CandleSeriesStore> {
        &self.store
    }

    /// Read-only snapshot of the series.
    pub fn current_series(&self) -> Arc<Vec<Candle>> {
        self.store.snapshot()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    pub fn phase(&self) -> SyncPhase {
        self.status.read().phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.read().connection
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == SyncPhase::Closed
    }

    /// Tear down: refuse further store writes, cancel the timer and any pull in
    /// flight, and close the subscription.  Idempotent.
    ///
    /// The store is closed before the task is aborted, so nothing the task
    /// might still be doing can reach the store or its chart surface.
    pub fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.store.close();
        task.abort();

        let mut status = self.status.write();
        status.phase = SyncPhase::Closed;
        status.connection = ConnectionState::Closed;
        drop(status);

        info!(
            session = %self.session_id,
            interval = %self.interval,
            "sync orchestrator closed"
        );
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Event loop
// =============================================================================

struct SyncLoop {
    settings: SyncSettings,
    interval: Interval,
    store: Arc<CandleSeriesStore>,
    status: Arc<RwLock<RunStatus>>,
    history: Arc<dyn HistorySource>,
    live: Arc<dyn LiveEventSource>,

    pending_pull: Option<BoxFuture<'static, PullResult>>,
    subscription: Option<BoxStream<'static, LiveNotification>>,
    /// Whether this run has ever opened a subscription.
    subscribed: bool,
    next_pull_at: Option<Instant>,
    /// Whether the surface has been fitted to a non-empty series yet.
    fitted: bool,
    /// `(occurred_at_millis, price)` of the last trade merged.
    last_trade: Option<(i64, f64)>,
}

impl SyncLoop {
    async fn run(mut self) {
        info!(
            refresh_ms = self.settings.refresh_period.as_millis() as u64,
            retry_ms = self.settings.retry_period.as_millis() as u64,
            live_updates = self.interval.is_finest(),
            "sync orchestrator started"
        );
        self.begin_pull(SyncPhase::Loading);

        loop {
            let can_pull = self.pending_pull.is_none() && self.next_pull_at.is_some();
            let deadline = self.next_pull_at.unwrap_or_else(Instant::now);

            tokio::select! {
                result = poll_pull(&mut self.pending_pull), if self.pending_pull.is_some() => {
                    self.pending_pull = None;
                    self.on_snapshot(result);
                }
                notification = poll_live(&mut self.subscription), if self.subscription.is_some() => {
                    self.on_live(notification);
                }
                _ = sleep_until(deadline), if can_pull => {
                    self.next_pull_at = None;
                    let phase = if self.phase() == SyncPhase::Degraded {
                        SyncPhase::Loading
                    } else {
                        self.phase()
                    };
                    self.begin_pull(phase);
                }
                else => {
                    warn!("sync orchestrator has nothing left to wait on -- stopping");
                    break;
                }
            }
        }
    }

    fn phase(&self) -> SyncPhase {
        self.status.read().phase
    }

    fn set_phase(&self, phase: SyncPhase) {
        let mut status = self.status.write();
        if status.phase != phase {
            debug!(from = %status.phase, to = %phase, "phase transition");
            status.phase = phase;
        }
    }

    fn set_connection(&self, connection: ConnectionState) {
        let mut status = self.status.write();
        if status.connection != connection {
            debug!(from = %status.connection, to = %connection, "connection transition");
            status.connection = connection;
        }
    }

    // ── Snapshot pulls ──────────────────────────────────────────────────

    fn begin_pull(&mut self, phase: SyncPhase) {
        self.set_phase(phase);
        debug!(limit = self.settings.snapshot_limit, "snapshot pull started");
        self.pending_pull = Some(self.history.fetch_candles(
            &self.settings.symbol,
            self.interval,
            self.settings.snapshot_limit,
        ));
    }

    fn on_snapshot(&mut self, result: PullResult) {
        match result {
            Ok(candles) => {
                let received = candles.len();
                if !self.store.replace(candles) {
                    return;
                }
                if self.phase() != SyncPhase::Live {
                    info!(candles = self.store.len(), "snapshot loaded -- live");
                } else {
                    debug!(received, kept = self.store.len(), "snapshot refreshed");
                }
                self.set_phase(SyncPhase::Live);
                self.next_pull_at = Some(Instant::now() + self.settings.refresh_period);

                if !self.fitted && !self.store.is_empty() {
                    self.store.fit_view();
                    self.fitted = true;
                }
                if !self.subscribed {
                    self.open_subscription();
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_ms = self.settings.retry_period.as_millis() as u64,
                    "snapshot pull failed -- clearing series and retrying"
                );
                // Show nothing rather than something stale.
                if !self.store.replace(Vec::new()) {
                    return;
                }
                self.set_phase(SyncPhase::Degraded);
                self.next_pull_at = Some(Instant::now() + self.settings.retry_period);
            }
        }
    }

    // ── Live subscription ───────────────────────────────────────────────

    fn open_subscription(&mut self) {
        self.subscribed = true;
        self.set_connection(ConnectionState::Connecting);
        self.subscription = Some(self.live.subscribe());
    }

    fn on_live(&mut self, notification: Option<LiveNotification>) {
        match notification {
            Some(LiveNotification::Open) => {
                info!("live subscription open");
                self.set_connection(ConnectionState::Open);
            }
            Some(LiveNotification::Message(msg)) => match msg.to_trade_event() {
                Some(Ok(event)) => self.on_trade(event),
                Some(Err(e)) => warn!(error = %e, "dropping malformed trade update"),
                None => {}
            },
            Some(LiveNotification::Error(reason)) => {
                let err = ChartError::Subscription(reason);
                error!(error = %err, "live subscription failed -- no reconnect until restart");
                self.subscription = None;
                self.set_connection(ConnectionState::Failed);
            }
            Some(LiveNotification::Closed) | None => {
                self.subscription = None;
                if self.status.read().connection != ConnectionState::Failed {
                    warn!("live subscription closed");
                    self.set_connection(ConnectionState::Closed);
                }
            }
        }
    }

    fn on_trade(&mut self, event: TradeEvent) {
        if event.symbol != self.settings.symbol {
            return;
        }
        // Coarser intervals follow the snapshot refresh only.
        if !self.interval.is_finest() {
            return;
        }

        let bucket = bucket_of(&event, self.interval);
        if let Some(last) = self.store.last() {
            if bucket < last.bucket_start {
                debug!(
                    bucket,
                    last_bucket = last.bucket_start,
                    "dropping stale trade"
                );
                return;
            }
        }
        let key = (event.occurred_at_millis, event.price);
        if self.last_trade == Some(key) {
            debug!(at = key.0, price = key.1, "dropping duplicate trade");
            return;
        }

        match self.store.apply_trade(&event) {
            Ok(Some(outcome)) => {
                self.last_trade = Some(key);
                debug!(
                    bucket = outcome.candle().bucket_start,
                    close = outcome.candle().close,
                    "live trade merged"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "dropping invalid trade"),
        }
    }
}

async fn poll_pull(pull: &mut Option<BoxFuture<'static, PullResult>>) -> PullResult {
    match pull {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn poll_live(
    subscription: &mut Option<BoxStream<'static, LiveNotification>>,
) -> Option<LiveNotification> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

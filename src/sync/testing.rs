//! In-memory collaborators for orchestrator and session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::ChartError;
use crate::exchange::HistorySource;
use crate::market_data::trade_stream::LiveMessage;
use crate::market_data::{Candle, LiveEventSource, LiveNotification};
use crate::sync::SyncSettings;
use crate::types::Interval;

pub fn settings() -> SyncSettings {
    SyncSettings {
        symbol: "BTC_USDT".into(),
        snapshot_limit: 100,
        refresh_period: Duration::from_secs(1),
        retry_period: Duration::from_secs(5),
    }
}

/// Give spawned tasks a chance to drain their queues (paused clock).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn trade_msg(symbol: &str, price: f64, time_millis: i64) -> LiveNotification {
    LiveNotification::Message(LiveMessage {
        kind: "TRADE_UPDATE".into(),
        symbol: Some(symbol.into()),
        price: Some(price),
        amount: Some(1.0),
        time: Some(time_millis),
    })
}

#[derive(Clone)]
struct Scripted {
    delay: Duration,
    result: Result<Vec<Candle>, ChartError>,
}

/// History source replaying a queue of responses.  Once the queue is empty the
/// last response is repeated.
#[derive(Default)]
pub struct ScriptedHistory {
    queue: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<Interval>>,
}

impl ScriptedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, candles: Vec<Candle>) {
        self.push_delayed_ok(Duration::ZERO, candles);
    }

    pub fn push_delayed_ok(&self, delay: Duration, candles: Vec<Candle>) {
        self.queue.lock().push_back(Scripted {
            delay,
            result: Ok(candles),
        });
    }

    pub fn push_err(&self, reason: &str) {
        self.queue.lock().push_back(Scripted {
            delay: Duration::ZERO,
            result: Err(ChartError::Unavailable(reason.into())),
        });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Intervals requested so far, in call order.
    pub fn requested(&self) -> Vec<Interval> {
        self.requested.lock().clone()
    }
}

impl HistorySource for ScriptedHistory {
    fn fetch_candles(
        &self,
        _symbol: &str,
        interval: Interval,
        _limit: usize,
    ) -> BoxFuture<'static, Result<Vec<Candle>, ChartError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(interval);

        let next = self.queue.lock().pop_front();
        let step = match next {
            Some(step) => {
                *self.last.lock() = Some(step.clone());
                step
            }
            None => self.last.lock().clone().unwrap_or(Scripted {
                delay: Duration::ZERO,
                result: Ok(Vec::new()),
            }),
        };

        async move {
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            step.result
        }
        .boxed()
    }
}

/// Live source whose connections are fed from test-held channels.
///
/// Each `prepare()` queues one connection; `subscribe()` hands them out in
/// order and returns a never-ending silent stream when none is queued.
#[derive(Default)]
pub struct ChannelLive {
    prepared: Mutex<VecDeque<mpsc::UnboundedReceiver<LiveNotification>>>,
    subscribes: AtomicUsize,
}

impl ChannelLive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&self) -> mpsc::UnboundedSender<LiveNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.prepared.lock().push_back(rx);
        tx
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

impl LiveEventSource for ChannelLive {
    fn subscribe(&self) -> BoxStream<'static, LiveNotification> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        match self.prepared.lock().pop_front() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|n| (n, rx))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}

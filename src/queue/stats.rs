//! Concurrency aggregation for autoscaling.
//!
//! Consumes the [`ReqEvent`] stream and, once per reporting period, turns it
//! into a time-weighted average concurrency for the window.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant};

use crate::observability::reporter::{RevisionLabels, StatsReporter};
use crate::queue::events::{ReqEvent, ReqEventType};

/// Aggregated view of one reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Stat {
    /// Time-weighted number of requests present in the sidecar.
    pub average_concurrency: f64,
    /// Time-weighted number of requests holding a breaker slot.
    pub average_proxied_concurrency: f64,
    /// Requests that entered during the window.
    pub request_count: u64,
    /// Requests that were forwarded during the window.
    pub proxied_request_count: u64,
}

/// Running totals for the current window.
#[derive(Debug)]
struct Window {
    start: Instant,
    last_change: Instant,
    concurrency: u64,
    proxied_concurrency: u64,
    weighted: f64,
    proxied_weighted: f64,
    request_count: u64,
    proxied_request_count: u64,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            start: now,
            last_change: now,
            concurrency: 0,
            proxied_concurrency: 0,
            weighted: 0.0,
            proxied_weighted: 0.0,
            request_count: 0,
            proxied_request_count: 0,
        }
    }

    fn advance(&mut self, now: Instant) {
        let now = now.max(self.last_change);
        let elapsed = (now - self.last_change).as_secs_f64();
        self.weighted += self.concurrency as f64 * elapsed;
        self.proxied_weighted += self.proxied_concurrency as f64 * elapsed;
        self.last_change = now;
    }

    fn record(&mut self, event: &ReqEvent) {
        self.advance(event.time);
        match event.event_type {
            ReqEventType::RequestIn => {
                self.concurrency += 1;
                self.request_count += 1;
            }
            ReqEventType::RequestOut => {
                self.concurrency = self.concurrency.saturating_sub(1);
            }
            ReqEventType::ProxiedIn => {
                self.proxied_concurrency += 1;
                self.proxied_request_count += 1;
            }
            ReqEventType::ProxiedOut => {
                self.proxied_concurrency = self.proxied_concurrency.saturating_sub(1);
            }
        }
    }

    /// Close the window at `now` and start the next one. Live concurrency
    /// carries over.
    fn rotate(&mut self, now: Instant) -> Stat {
        self.advance(now);
        let elapsed = (self.last_change - self.start).as_secs_f64();
        let (average, proxied_average) = if elapsed > 0.0 {
            (self.weighted / elapsed, self.proxied_weighted / elapsed)
        } else {
            (self.concurrency as f64, self.proxied_concurrency as f64)
        };

        let stat = Stat {
            average_concurrency: average,
            average_proxied_concurrency: proxied_average,
            request_count: self.request_count,
            proxied_request_count: self.proxied_request_count,
        };

        self.start = self.last_change;
        self.weighted = 0.0;
        self.proxied_weighted = 0.0;
        self.request_count = 0;
        self.proxied_request_count = 0;
        stat
    }
}

/// Single consumer of the event channel.
pub struct StatsAggregator {
    events: mpsc::Receiver<ReqEvent>,
    report_period: Duration,
    reporter: Option<Arc<dyn StatsReporter>>,
    labels: RevisionLabels,
    stat_tx: watch::Sender<Stat>,
}

impl StatsAggregator {
    /// Create an aggregator. Returns it together with a receiver that always
    /// holds the latest published [`Stat`].
    pub fn new(
        events: mpsc::Receiver<ReqEvent>,
        report_period: Duration,
        reporter: Option<Arc<dyn StatsReporter>>,
        labels: RevisionLabels,
    ) -> (Self, watch::Receiver<Stat>) {
        let (stat_tx, stat_rx) = watch::channel(Stat::default());
        (
            Self {
                events,
                report_period,
                reporter,
                labels,
                stat_tx,
            },
            stat_rx,
        )
    }

    /// Consume events until every sender is gone or shutdown fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut window = Window::new(Instant::now());
        let mut ticker = time::interval_at(Instant::now() + self.report_period, self.report_period);

        tracing::debug!(period = ?self.report_period, "Stats aggregator starting");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => window.record(&event),
                    None => {
                        tracing::debug!("Event channel closed, stopping stats aggregator");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let stat = window.rotate(Instant::now());
                    self.publish(stat);
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Stats aggregator received shutdown signal");
                    break;
                }
            }
        }
    }

    fn publish(&self, stat: Stat) {
        tracing::trace!(
            average_concurrency = stat.average_concurrency,
            requests = stat.request_count,
            "Publishing concurrency stat"
        );
        if let Some(reporter) = &self.reporter {
            reporter.report_request_concurrency(&self.labels, stat.average_concurrency);
        }
        self.stat_tx.send_replace(stat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::events;
    use std::sync::Mutex;

    fn event(event_type: ReqEventType, time: Instant) -> ReqEvent {
        ReqEvent { event_type, time }
    }

    #[test]
    fn test_time_weighted_average() {
        let t0 = Instant::now();
        let mut window = Window::new(t0);

        // One request for the whole second, a second one for the last half.
        window.record(&event(ReqEventType::RequestIn, t0));
        window.record(&event(ReqEventType::RequestIn, t0 + Duration::from_millis(500)));
        let stat = window.rotate(t0 + Duration::from_secs(1));

        assert!((stat.average_concurrency - 1.5).abs() < 1e-9, "got {}", stat.average_concurrency);
        assert_eq!(stat.request_count, 2);
        assert_eq!(stat.proxied_request_count, 0);
    }

    #[test]
    fn test_concurrency_carries_into_next_window() {
        let t0 = Instant::now();
        let mut window = Window::new(t0);
        window.record(&event(ReqEventType::RequestIn, t0));
        window.record(&event(ReqEventType::ProxiedIn, t0));
        window.rotate(t0 + Duration::from_secs(1));

        window.record(&event(ReqEventType::ProxiedOut, t0 + Duration::from_millis(1500)));
        window.record(&event(ReqEventType::RequestOut, t0 + Duration::from_millis(1500)));
        let stat = window.rotate(t0 + Duration::from_secs(2));

        assert!((stat.average_concurrency - 0.5).abs() < 1e-9);
        assert!((stat.average_proxied_concurrency - 0.5).abs() < 1e-9);
        assert_eq!(stat.request_count, 0);
    }

    #[test]
    fn test_out_of_order_timestamps_do_not_go_negative() {
        let t0 = Instant::now();
        let mut window = Window::new(t0 + Duration::from_secs(1));
        window.record(&event(ReqEventType::RequestOut, t0));
        let stat = window.rotate(t0 + Duration::from_secs(2));
        assert_eq!(stat.average_concurrency, 0.0);
    }

    #[derive(Default)]
    struct RecordingReporter {
        concurrency: Mutex<Vec<f64>>,
    }

    impl StatsReporter for RecordingReporter {
        fn report_request_concurrency(&self, _labels: &RevisionLabels, value: f64) {
            self.concurrency.lock().unwrap().push(value);
        }
        fn report_request_count(&self, _labels: &RevisionLabels, _code: u16, _tries: u32) {}
        fn report_response_time(&self, _labels: &RevisionLabels, _code: u16, _d: Duration) {}
    }

    #[tokio::test]
    async fn test_aggregator_publishes_and_reports() {
        let (tx, rx) = events::channel(16);
        let reporter = Arc::new(RecordingReporter::default());
        let (aggregator, mut stats) = StatsAggregator::new(
            rx,
            Duration::from_millis(50),
            Some(reporter.clone() as Arc<dyn StatsReporter>),
            RevisionLabels::default(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(aggregator.run(shutdown_rx));

        tx.emit(ReqEventType::RequestIn);
        tx.emit(ReqEventType::ProxiedIn);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                stats.changed().await.unwrap();
                if stats.borrow().request_count == 1 {
                    break;
                }
            }
        })
        .await
        .expect("no stat published");

        assert_eq!(stats.borrow().proxied_request_count, 1);
        assert!(!reporter.concurrency.lock().unwrap().is_empty());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_aggregator_stops_when_senders_dropped() {
        let (tx, rx) = events::channel(4);
        let (aggregator, _stats) =
            StatsAggregator::new(rx, Duration::from_secs(60), None, RevisionLabels::default());
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(aggregator.run(shutdown_rx));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("aggregator did not stop")
            .unwrap();
    }
}

//! Periodic HTTP health pinger, the service's background ticker.
//!
//! Every `interval` it sends a `GET` to each configured target and logs the
//! status and latency. No retries: a failed ping is simply logged and the
//! next round happens on schedule.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vpnht_config::PingConfig;

use crate::BoxFuture;
use crate::collab::BackgroundTask;

/// Result of pinging one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    Reachable { status: u16, latency: Duration },
    Unreachable { reason: String },
}

pub struct HttpPinger {
    client: reqwest::Client,
    targets: Vec<String>,
    interval: Duration,
}

impl HttpPinger {
    pub fn new(config: &PingConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("vpnht-service/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            targets: config.targets.clone(),
            interval: config.interval(),
        })
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Ping a single target once.
    pub async fn ping(&self, target: &str) -> PingOutcome {
        let started = Instant::now();
        match self.client.get(target).send().await {
            Ok(resp) => PingOutcome::Reachable {
                status: resp.status().as_u16(),
                latency: started.elapsed(),
            },
            Err(e) => PingOutcome::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    async fn round(&self) {
        for target in &self.targets {
            match self.ping(target).await {
                PingOutcome::Reachable { status, latency } => debug!(
                    target = %target,
                    status,
                    latency_ms = latency.as_millis() as u64,
                    "Ping"
                ),
                PingOutcome::Unreachable { reason } => {
                    warn!(target = %target, reason = %reason, "Ping failed")
                }
            }
        }
    }

    async fn run_until_cancelled(&self, cancel: CancellationToken) {
        if self.targets.is_empty() {
            debug!("No ping targets configured, pinger idle");
            cancel.cancelled().await;
            return;
        }

        info!(
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs(),
            "Pinger running"
        );
        let mut ticks = tokio::time::interval(self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticks.tick() => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.round() => {}
                    }
                }
            }
        }
        debug!("Pinger stopped");
    }
}

impl BackgroundTask for HttpPinger {
    fn name(&self) -> &str {
        "pinger"
    }

    fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, ()> {
        Box::pin(self.run_until_cancelled(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::routing::get;

    fn config(targets: Vec<String>) -> PingConfig {
        PingConfig {
            interval_secs: 1,
            timeout_secs: 1,
            targets,
        }
    }

    #[tokio::test]
    async fn test_idle_pinger_stops_on_cancel() {
        let pinger = HttpPinger::new(&config(Vec::new())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(100), pinger.run(cancel))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pinger = HttpPinger::new(&config(Vec::new())).unwrap();
        let outcome = pinger.ping(&format!("http://{addr}/")).await;
        assert!(matches!(outcome, PingOutcome::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_pings_targets_until_cancelled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let target = format!("http://{addr}/");
        let pinger = Arc::new(HttpPinger::new(&config(vec![target.clone()])).unwrap());
        assert!(matches!(
            pinger.ping(&target).await,
            PingOutcome::Reachable { status: 200, .. }
        ));

        let cancel = CancellationToken::new();
        let task = {
            let pinger = Arc::clone(&pinger);
            let cancel = cancel.clone();
            tokio::spawn(async move { pinger.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // One direct ping plus at least the first scheduled round.
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }
}

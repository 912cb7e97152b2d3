//! Generic polling worker.
//!
//! Every polling link is a [`Poller`] driven by one [`PollWorker`]: the
//! worker owns the TCP session, reconnects on each cycle tick while
//! disconnected, and hands the live link to the poller once per period.
//! Errors inside a cycle are logged and the cycle is skipped — nothing
//! propagates out of the worker loop.

use super::link::MountLink;
use super::ProtocolError;
use crate::config::defaults::CYCLE_TICK_MS;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often a poller's cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCadence {
    /// Run every period while connected.
    Periodic(Duration),
    /// Run once per (re)connection, then stay idle until the link drops.
    OnConnect,
}

/// Idle re-run interval for on-connect pollers. A dead socket only
/// surfaces on I/O, so the cycle repeats occasionally as a liveness
/// probe; the reads involved are idempotent.
const ON_CONNECT_PROBE: Duration = Duration::from_secs(60);

/// One polling protocol engine: a command template plus a parser that
/// writes into the shared mount data.
#[async_trait]
pub trait Poller: Send + 'static {
    /// Link name, used for logging and connection-status events.
    fn name(&self) -> &'static str;

    /// Cycle cadence.
    fn cadence(&self) -> PollCadence;

    /// One poll cycle over a connected link: send the template(s), parse
    /// the reply fields, update MountData, emit events.
    async fn cycle(&mut self, link: &mut MountLink) -> Result<(), ProtocolError>;
}

/// Owns a link and drives a [`Poller`] until cancellation.
pub struct PollWorker<P: Poller> {
    link: MountLink,
    poller: P,
}

impl<P: Poller> PollWorker<P> {
    pub fn new(link: MountLink, poller: P) -> Self {
        Self { link, poller }
    }

    /// Worker loop. Reconnect attempts happen on every tick while the
    /// link is down; poll cycles run at the poller's cadence once up.
    pub async fn run(mut self, cancel: CancellationToken) {
        let tick = match self.poller.cadence() {
            PollCadence::Periodic(period) => period,
            PollCadence::OnConnect => Duration::from_millis(CYCLE_TICK_MS),
        };
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last_run: Option<std::time::Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !self.link.is_connected() {
                last_run = None;
                if let Err(e) = self.link.ensure_connected().await {
                    debug!(link = self.poller.name(), error = %e, "Reconnect attempt failed");
                    continue;
                }
            }

            if self.poller.cadence() == PollCadence::OnConnect {
                if let Some(at) = last_run {
                    if at.elapsed() < ON_CONNECT_PROBE {
                        continue;
                    }
                }
            }

            match self.poller.cycle(&mut self.link).await {
                Ok(()) => {
                    last_run = Some(std::time::Instant::now());
                }
                Err(ProtocolError::Link(e)) => {
                    debug!(link = self.poller.name(), error = %e, "Link error — cycle skipped");
                }
                Err(e) => {
                    warn!(link = self.poller.name(), error = %e, "Poll cycle failed — skipped");
                    last_run = Some(std::time::Instant::now());
                }
            }
        }

        self.link.disconnect().await;
    }
}

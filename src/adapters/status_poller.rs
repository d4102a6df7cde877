//! Background gateway status poller
//!
//! Probes the gateway on a fixed interval and fans out a notification
//! whenever the observed health changes. Every probe refreshes the
//! broadcaster's last-known status so new viewer sessions see a recent
//! snapshot on connect.

use crate::adapters::broadcast::Broadcaster;
use crate::adapters::gateway_client::GatewayClient;
use crate::domain::ChangeNotification;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct StatusPoller {
    gateway: Arc<GatewayClient>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(
        gateway: Arc<GatewayClient>,
        broadcaster: Arc<Broadcaster>,
        poll_secs: u64,
    ) -> Self {
        Self {
            gateway,
            broadcaster,
            interval: Duration::from_secs(poll_secs),
        }
    }

    /// Run the poll loop forever. Intended to be spawned at startup.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Gateway status poller started");
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            self.poll_once().await;
        }
    }

    /// A single probe and fan-out cycle.
    pub async fn poll_once(&self) {
        let status = self.gateway.gateway_status().await;
        let health = status.status;
        let changed = self.broadcaster.update_status(status.clone()).await;
        if changed {
            info!(health = ?health, "Gateway health changed");
            self.broadcaster
                .broadcast(ChangeNotification::GatewayStatusChanged(status))
                .await;
        } else {
            debug!(health = ?health, "Gateway health unchanged");
        }
    }
}

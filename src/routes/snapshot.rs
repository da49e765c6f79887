// Published dial-priority list of egress devices, refreshed from the route table

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::merge::merge_devices;
use super::parser::discover_default_route_devices;
use crate::error::RouterResult;

#[derive(Debug, Default)]
struct InterfaceList {
    devices: Vec<String>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Current ordered interface list. A refresh replaces the whole list at once;
/// readers get their own copy and never see a partial update.
#[derive(Debug)]
pub struct RouteSnapshot {
    current: RwLock<InterfaceList>,
    preferred: Vec<String>,
    route_table: PathBuf,
}

impl RouteSnapshot {
    /// Build the snapshot and compute the initial list synchronously.
    /// If the table cannot be used yet the list starts out empty.
    pub fn new(route_table: impl Into<PathBuf>, preferred: Vec<String>) -> Self {
        let snapshot = RouteSnapshot {
            current: RwLock::new(InterfaceList::default()),
            preferred,
            route_table: route_table.into(),
        };

        match snapshot.refresh() {
            Ok(devices) => tracing::info!("Default route devices: {:?}", devices),
            Err(e) => tracing::warn!(
                "No default route devices from {}: {}",
                snapshot.route_table.display(),
                e
            ),
        }

        snapshot
    }

    /// Snapshot pinned to a fixed list, never backed by a route table
    #[cfg(test)]
    pub fn with_devices(devices: &[&str]) -> Self {
        RouteSnapshot {
            current: RwLock::new(InterfaceList {
                devices: devices.iter().map(|d| d.to_string()).collect(),
                refreshed_at: Some(Utc::now()),
            }),
            preferred: Vec::new(),
            route_table: PathBuf::from("/nonexistent"),
        }
    }

    /// Copy of the current dial-priority list
    pub fn devices(&self) -> Vec<String> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.devices.clone()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.refreshed_at
    }

    pub fn preferred(&self) -> &[String] {
        &self.preferred
    }

    /// Re-read the route table and swap in the merged list. On error the
    /// previous list stays published.
    pub fn refresh(&self) -> RouterResult<Vec<String>> {
        let discovered = discover_default_route_devices(&self.route_table)?;
        let devices = merge_devices(&discovered, &self.preferred);

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = InterfaceList {
            devices: devices.clone(),
            refreshed_at: Some(Utc::now()),
        };

        Ok(devices)
    }

    /// Refresh every `period` until `shutdown` fires. A zero period disables
    /// refreshing and the initial list stays in place.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if period.is_zero() {
            tracing::info!("Device refresh disabled");
            return None;
        }

        let snapshot = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately and the list was just built
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        // reading the table is a blocking file read
                        let refresher = Arc::clone(&snapshot);
                        match tokio::task::spawn_blocking(move || refresher.refresh()).await {
                            Ok(Ok(devices)) => tracing::debug!("Refreshed default route devices: {:?}", devices),
                            Ok(Err(e)) => tracing::warn!("Device refresh failed, keeping previous list: {}", e),
                            Err(e) => tracing::warn!("Device refresh task panicked: {}", e),
                        }
                    }
                }
            }
            tracing::debug!("Device refresh task stopped");
        }))
    }
}

// Device dialer - picks the egress device for a destination and learns from the result

pub mod connector;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{RouterError, RouterResult};
use crate::routes::snapshot::RouteSnapshot;
use crate::trie::AddressTrie;
pub use connector::{BoundConnector, InterfaceConnector};

type AttemptResult = (String, RouterResult<TcpStream>);

/// An established outbound connection
#[derive(Debug)]
pub struct DialOutcome {
    pub stream: TcpStream,
    /// Device the connection went out on
    pub device: String,
    /// Address actually dialled, after any redirect
    pub target: SocketAddrV4,
}

pub struct DeviceDialer {
    trie: Arc<AddressTrie>,
    snapshot: Arc<RouteSnapshot>,
    connector: Arc<dyn InterfaceConnector>,
    connect_timeout: Duration,
}

impl DeviceDialer {
    pub fn new(
        trie: Arc<AddressTrie>,
        snapshot: Arc<RouteSnapshot>,
        connector: Arc<dyn InterfaceConnector>,
        connect_timeout: Duration,
    ) -> Self {
        DeviceDialer {
            trie,
            snapshot,
            connector,
            connect_timeout,
        }
    }

    /// Apply a configured redirect for this host, if any. The port is kept.
    pub fn resolve(&self, ip: Ipv4Addr, port: u16) -> SocketAddrV4 {
        let requested = SocketAddrV4::new(ip, port);
        let target = SocketAddrV4::new(self.trie.redirect_for(ip), port);
        if target != requested {
            tracing::info!("Redirecting {} to {}", requested, target);
        }
        target
    }

    /// Connect to `ip:port` on the best known device.
    ///
    /// A host with an exact device entry is dialled on that device first and
    /// then on the remaining snapshot devices one at a time. Any other host is
    /// raced across every snapshot device at once. The winning device is fed
    /// back into the trie.
    pub async fn dial(&self, ip: Ipv4Addr, port: u16) -> RouterResult<DialOutcome> {
        let target = self.resolve(ip, port);
        let devices = self.snapshot.devices();

        let (device, stream) = match self.trie.device_for_exact(*target.ip()) {
            Some(pinned) => {
                tracing::debug!("{} is pinned to dev {}", target, pinned);
                let candidates = pinned_first(&pinned, &devices);
                self.dial_sequential(target, &candidates).await?
            }
            None => {
                tracing::trace!(
                    "{} has no pinned device, last learned dev {:?}",
                    target,
                    self.trie.device_for(*target.ip())
                );
                self.dial_race(target, &devices).await?
            }
        };

        self.trie.insert_learned(*target.ip(), &device);

        Ok(DialOutcome {
            stream,
            device,
            target,
        })
    }

    /// Try `candidates` strictly in order, stopping at the first success
    async fn dial_sequential(
        &self,
        target: SocketAddrV4,
        candidates: &[String],
    ) -> RouterResult<(String, TcpStream)> {
        for device in candidates {
            match connect_with_timeout(self.connector.as_ref(), device, target, self.connect_timeout).await {
                Ok(stream) => return Ok((device.clone(), stream)),
                Err(e) => log_attempt_failure(target, device, &e),
            }
        }

        if candidates.is_empty() {
            return Err(RouterError::NoCandidates(target));
        }
        Err(RouterError::AllCandidatesFailed {
            addr: target,
            attempts: candidates.len(),
        })
    }

    /// Dial every device concurrently; the first connection wins and the rest
    /// are cancelled. Attempts that still connect after the win are closed.
    async fn dial_race(&self, target: SocketAddrV4, devices: &[String]) -> RouterResult<(String, TcpStream)> {
        if devices.is_empty() {
            return Err(RouterError::NoCandidates(target));
        }

        let cancel = CancellationToken::new();
        let mut attempts: JoinSet<AttemptResult> = JoinSet::new();

        for device in devices {
            let device = device.clone();
            let connector = Arc::clone(&self.connector);
            let cancel = cancel.clone();
            let timeout = self.connect_timeout;

            attempts.spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(RouterError::Cancelled),
                    result = connect_with_timeout(connector.as_ref(), &device, target, timeout) => result,
                };
                (device, result)
            });
        }

        let mut winner = None;
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((device, Ok(stream))) => {
                    winner = Some((device, stream));
                    break;
                }
                Ok((device, Err(e))) => log_attempt_failure(target, &device, &e),
                Err(e) => tracing::warn!("Dial task for {} aborted: {}", target, e),
            }
        }

        match winner {
            Some((device, stream)) => {
                tracing::debug!("Dial {} won by dev {}", target, device);
                cancel.cancel();
                if !attempts.is_empty() {
                    tokio::spawn(close_late_connections(attempts, target));
                }
                Ok((device, stream))
            }
            None => Err(RouterError::AllCandidatesFailed {
                addr: target,
                attempts: devices.len(),
            }),
        }
    }
}

async fn connect_with_timeout(
    connector: &dyn InterfaceConnector,
    device: &str,
    target: SocketAddrV4,
    timeout: Duration,
) -> RouterResult<TcpStream> {
    match tokio::time::timeout(timeout, connector.connect(device, target)).await {
        Ok(result) => result,
        Err(_) => Err(RouterError::ConnectTimeout {
            device: device.to_string(),
            addr: target,
        }),
    }
}

fn log_attempt_failure(target: SocketAddrV4, device: &str, error: &RouterError) {
    match error {
        RouterError::Cancelled => tracing::trace!("Dial {} on dev {} cancelled", target, device),
        e if e.is_retryable() => tracing::debug!("Dial {} on dev {} failed: {}", target, device, e),
        e => tracing::warn!("Dial {} on dev {} failed: {}", target, device, e),
    }
}

async fn close_late_connections(mut attempts: JoinSet<AttemptResult>, target: SocketAddrV4) {
    while let Some(joined) = attempts.join_next().await {
        if let Ok((device, Ok(stream))) = joined {
            tracing::debug!("Closing late connection to {} on dev {}", target, device);
            drop(stream);
        }
    }
}

/// `pinned`, then the snapshot devices without it, in snapshot order
fn pinned_first(pinned: &str, devices: &[String]) -> Vec<String> {
    std::iter::once(pinned.to_string())
        .chain(devices.iter().filter(|d| d.as_str() != pinned).cloned())
        .collect()
}

//! UDP multicast discovery beacon (optional collaborator)
//!
//! Announces our listen address to the LAN and turns announcements from
//! other nodes into add/remove peer events. The wire is a single ASCII
//! line: `collective +host:port` (joining / still here, repeated on an
//! interval) or `collective -host:port` (leaving). The beacon only feeds
//! the coordinator's candidate set; mesh formation itself stays TCP.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::error::CollectiveError;
use crate::protocol::PeerAddress;

pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);
pub const MULTICAST_PORT: u16 = 45892;

const ANNOUNCE_PREFIX: &str = "collective ";

/// Candidate-set change reported by the beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added(PeerAddress),
    Removed(PeerAddress),
}

/// Format one announcement line.
pub fn format_announcement(addr: &PeerAddress, joining: bool) -> String {
    let sign = if joining { '+' } else { '-' };
    format!("{ANNOUNCE_PREFIX}{sign}{}:{}", addr.host, addr.port)
}

/// Parse one announcement line; `None` for anything that is not ours.
pub fn parse_announcement(line: &str) -> Option<PeerEvent> {
    let rest = line.trim_end().strip_prefix(ANNOUNCE_PREFIX)?;
    let (joining, addr) = if let Some(a) = rest.strip_prefix('+') {
        (true, a)
    } else {
        (false, rest.strip_prefix('-')?)
    };
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    let peer = PeerAddress::new(host, port);
    if joining {
        Some(PeerEvent::Added(peer))
    } else {
        Some(PeerEvent::Removed(peer))
    }
}

/// Multicast announcer/listener bound to the beacon group.
pub struct DiscoveryBeacon {
    socket: Arc<UdpSocket>,
    local: PeerAddress,
}

impl DiscoveryBeacon {
    /// Join the multicast group. Loopback stays enabled so several nodes
    /// on one machine can discover each other.
    pub async fn bind(local: PeerAddress) -> Result<Self, CollectiveError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)).await?;
        socket.join_multicast_v4(MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            local,
        })
    }

    /// Start announcing on `every` and listening for peers. Announcements
    /// about our own address are filtered out of the returned stream.
    pub fn start(&self, every: Duration) -> mpsc::Receiver<PeerEvent> {
        let (tx, rx) = mpsc::channel(64);

        let announcer = Arc::clone(&self.socket);
        let local = self.local.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let line = format_announcement(&local, true);
                if let Err(e) = announcer
                    .send_to(line.as_bytes(), (MULTICAST_ADDR, MULTICAST_PORT))
                    .await
                {
                    log::warn!("beacon announce failed: {e}");
                }
            }
        });

        let listener = Arc::clone(&self.socket);
        let local_id = self.local.id();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let n = match listener.recv_from(&mut buf).await {
                    Ok((n, _)) => n,
                    Err(e) => {
                        log::warn!("beacon recv failed: {e}");
                        continue;
                    }
                };
                let Ok(line) = std::str::from_utf8(&buf[..n]) else {
                    continue;
                };
                let Some(event) = parse_announcement(line) else {
                    continue;
                };
                let addr = match &event {
                    PeerEvent::Added(a) | PeerEvent::Removed(a) => a,
                };
                if addr.id() == local_id {
                    continue;
                }
                log::debug!("beacon event: {event:?}");
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        rx
    }

    /// Broadcast our departure once.
    pub async fn leave(&self) -> Result<(), CollectiveError> {
        let line = format_announcement(&self.local, false);
        self.socket
            .send_to(line.as_bytes(), (MULTICAST_ADDR, MULTICAST_PORT))
            .await?;
        Ok(())
    }
}

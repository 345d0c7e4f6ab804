//! LAN discovery: UDP multicast presence beacon, listen for other nodes' beacons, feed the peer registry.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use lansync_core::PRESENCE_BEACON;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::registry::PeerRegistry;
use crate::shutdown::Shutdown;

const BEACON_INTERVAL: Duration = Duration::from_secs(5);
/// LAN-scoped hop limit.
const MULTICAST_TTL: u32 = 2;

/// Where to beacon and which TCP port admitted peers listen on.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub peer_port: u16,
}

/// Run discovery until shutdown: beacon every 5 s, admit the sender of every foreign beacon.
pub async fn run_discovery(
    registry: Arc<PeerRegistry>,
    cfg: DiscoveryConfig,
    shutdown: Shutdown,
) -> std::io::Result<()> {
    let socket = Arc::new(make_multicast_socket(cfg.group, cfg.port)?);
    let local_ip = local_ip();
    debug!(%local_ip, group = %cfg.group, port = cfg.port, "discovery started");

    let send_socket = socket.clone();
    let send_shutdown = shutdown.clone();
    let beacon_task = tokio::spawn(async move {
        beacon_loop(send_socket, cfg.group, cfg.port, send_shutdown).await
    });
    let recv_task = tokio::spawn(async move {
        recv_loop(socket, registry, local_ip, cfg.peer_port, shutdown).await
    });

    let _ = tokio::try_join!(beacon_task, recv_task);
    Ok(())
}

fn make_multicast_socket(group: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
    std_sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(MULTICAST_TTL)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn beacon_loop(socket: Arc<UdpSocket>, group: Ipv4Addr, port: u16, shutdown: Shutdown) {
    let dest = SocketAddr::V4(SocketAddrV4::new(group, port));
    while shutdown.is_active() {
        if let Err(e) = socket.send_to(PRESENCE_BEACON, dest).await {
            warn!(error = %e, "failed to send presence beacon");
        }
        if !shutdown.sleep(BEACON_INTERVAL).await {
            break;
        }
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    local_ip: IpAddr,
    peer_port: u16,
    shutdown: Shutdown,
) {
    let mut buf = vec![0u8; 1024];
    while shutdown.is_active() {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = shutdown.cancelled() => break,
        };
        match received {
            Ok((n, from)) => {
                debug!(%from, bytes = n, "datagram received");
                if let Some(peer) = beacon_sender(&buf[..n], from, local_ip, peer_port) {
                    registry.admit(peer).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
                // Avoid spinning on a persistent socket error.
                if !shutdown.sleep(Duration::from_millis(200)).await {
                    break;
                }
            }
        }
    }
}

/// Peer address to admit for a datagram, or `None` for foreign payloads and our own beacons.
pub fn beacon_sender(
    payload: &[u8],
    from: SocketAddr,
    local_ip: IpAddr,
    peer_port: u16,
) -> Option<SocketAddr> {
    if payload != PRESENCE_BEACON || from.ip() == local_ip {
        return None;
    }
    Some(SocketAddr::new(from.ip(), peer_port))
}

/// Address of the interface used for outbound LAN traffic; loopback if none.
pub fn local_ip() -> IpAddr {
    // No packet is sent; connecting a UDP socket only selects a route.
    let probe = || -> std::io::Result<IpAddr> {
        let sock = std::net::UdpSocket::bind(("0.0.0.0", 0))?;
        sock.connect(("10.255.255.255", 1))?;
        Ok(sock.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

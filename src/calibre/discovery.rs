// UDP broadcast discovery of a running Calibre "Smart Device App".
//
// Grounded on `calibre_network.c`'s `calibre_start_discovery`/
// `calibre_process_discovery`: broadcast a bare "hello" to each of the
// well-known ports every 500ms, up to `MAX_DISCOVERY_BROADCASTS` times,
// and treat any reply containing "calibre" as a hit. The original opens
// one UDP socket per broadcast port purely so each has a local address
// to `sendto()` from; a single socket can target multiple destination
// ports from one bound local port and still receive every reply on it,
// so discovery here uses one `embassy_net::udp::UdpSocket` instead of
// five. Wire format, ports, and timing are unchanged.

use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, IpListenEndpoint, Ipv4Address, Stack};
use embassy_time::{Duration, Timer};

use crate::error::{ErrorKind, PapyrixError, Result};

pub const BROADCAST_PORTS: [u16; 5] = [54982, 48123, 39001, 44044, 59678];
pub const MAX_DISCOVERY_BROADCASTS: u32 = 20;
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_PORT: u16 = 9090;

pub struct Discovered {
    pub host: Ipv4Address,
    pub port: u16,
}

/// Broadcast "hello" on every well-known port, polling for a reply
/// containing "calibre" after each round, until one arrives or the
/// broadcast budget runs out.
pub async fn discover(stack: Stack<'_>) -> Result<Discovered> {
    let mut rx_meta = [PacketMetadata::EMPTY; 8];
    let mut tx_meta = [PacketMetadata::EMPTY; 8];
    let mut rx_buf = [0u8; 512];
    let mut tx_buf = [0u8; 512];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);

    socket
        .bind(IpListenEndpoint { addr: None, port: 0 })
        .map_err(|_| PapyrixError::new(ErrorKind::IOError, "udp bind failed"))?;

    let broadcast = Ipv4Address::BROADCAST;

    for _ in 0..MAX_DISCOVERY_BROADCASTS {
        for &port in &BROADCAST_PORTS {
            let endpoint = IpEndpoint::new(broadcast.into(), port);
            let _ = socket.send_to(b"hello", endpoint).await;
        }

        let mut buf = [0u8; 256];
        let deadline = embassy_time::Instant::now() + BROADCAST_INTERVAL;
        loop {
            let now = embassy_time::Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            match embassy_futures::select::select(socket.recv_from(&mut buf), Timer::after(remaining)).await {
                embassy_futures::select::Either::First(Ok((n, meta))) => {
                    if let Some(found) = parse_discovery_reply(&buf[..n]) {
                        if let embassy_net::IpAddress::Ipv4(host) = meta.endpoint.addr {
                            return Ok(Discovered { host, port: found });
                        }
                    }
                }
                _ => break,
            }
        }
    }

    Err(PapyrixError::new(ErrorKind::Timeout, "calibre discovery timed out"))
}

/// A discovery reply looks like:
/// `"calibre wireless device client (on <hostname>);<content_port>,<smart_device_port>"`
/// The TCP port to connect to is whatever follows the last comma.
fn parse_discovery_reply(data: &[u8]) -> Option<u16> {
    let text = core::str::from_utf8(data).ok()?;
    if !text.contains("calibre") {
        return None;
    }
    match text.rsplit_once(',') {
        Some((_, port_str)) => port_str.trim().parse().ok().or(Some(DEFAULT_PORT)),
        None => Some(DEFAULT_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_after_last_comma() {
        let reply = b"calibre wireless device client (on desktop);9090,8080";
        assert_eq!(parse_discovery_reply(reply), Some(8080));
    }

    #[test]
    fn falls_back_to_default_port_without_comma() {
        let reply = b"calibre wireless device client (on desktop)";
        assert_eq!(parse_discovery_reply(reply), Some(DEFAULT_PORT));
    }

    #[test]
    fn ignores_non_calibre_replies() {
        assert_eq!(parse_discovery_reply(b"not calibre"), None);
    }
}

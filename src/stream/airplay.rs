//! AirPlay delivery
//!
//! Finds a receiver with a one-shot mDNS PTR query for `_airplay._tcp.local`
//! and hands it the stream URL with `POST /play`. The first device to
//! answer wins.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;

pub const SERVICE: &str = "_airplay._tcp.local";
pub const MDNS_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251)), 5353);
pub const DEFAULT_PORT: u16 = 7000;

/// Queries are repeated at this interval until someone answers
const QUERY_INTERVAL: Duration = Duration::from_secs(1);

const TYPE_PTR: u16 = 12;
const CLASS_IN: u16 = 1;
const FLAG_RESPONSE: u16 = 0x8000;

#[derive(Debug, Error)]
pub enum AirPlayError {
    #[error("mDNS discovery failed: {0}")]
    Discovery(#[from] std::io::Error),
    #[error("AirPlay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AirPlay device refused playback: HTTP {0}")]
    Status(u16),
}

/// DNS query packet asking for PTR records of `service`
pub fn query_packet(service: &str) -> Vec<u8> {
    // id, flags, one question, no answer/authority/additional records
    let mut packet = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
    for label in service.split('.').filter(|l| !l.is_empty()) {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&TYPE_PTR.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    packet
}

/// Whether `packet` is a DNS response with answers mentioning `service`
pub fn answers_service(packet: &[u8], service: &str) -> bool {
    if packet.len() < 12 {
        return false;
    }
    let flags = u16::from_be_bytes([packet[2], packet[3]]);
    let answers = u16::from_be_bytes([packet[6], packet[7]]);
    if flags & FLAG_RESPONSE == 0 || answers == 0 {
        return false;
    }
    let Some(first) = service.split('.').next().filter(|l| !l.is_empty()) else {
        return false;
    };
    let mut label = vec![first.len() as u8];
    label.extend_from_slice(first.as_bytes());
    packet[12..].windows(label.len()).any(|w| w == label.as_slice())
}

/// A receiver that accepted our query
#[derive(Debug, Clone)]
pub struct AirPlayDevice {
    base_url: String,
    client: reqwest::Client,
}

impl AirPlayDevice {
    pub fn new(ip: IpAddr) -> Self {
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        Self::with_base_url(format!("http://{host}:{DEFAULT_PORT}"))
    }

    /// Create a device with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the device to start playing `href`
    pub async fn play(&self, href: &str) -> Result<(), AirPlayError> {
        let body = format!("Content-Location: {href}\nStart-Position: 0\n");
        let response = self
            .client
            .post(format!("{}/play", self.base_url))
            .header("Content-Location", href)
            .header("Content-Type", "text/parameters")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AirPlayError::Status(response.status().as_u16()));
        }
        tracing::info!(device = %self.base_url, href, "AirPlay playback requested");
        Ok(())
    }
}

/// Discover the first AirPlay receiver on the local network. Keeps asking
/// until one answers; callers race it against their own cancellation.
pub async fn discover() -> Result<AirPlayDevice, AirPlayError> {
    discover_at(MDNS_ADDR).await.map(AirPlayDevice::new)
}

/// Send the PTR query to `target` and return the address of the first
/// responder that answers for the AirPlay service
pub async fn discover_at(target: SocketAddr) -> Result<IpAddr, AirPlayError> {
    let bind: SocketAddr = if target.ip().is_loopback() {
        (Ipv4Addr::LOCALHOST, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    let query = query_packet(SERVICE);
    let mut buf = vec![0u8; 9000];
    let mut ticker = tokio::time::interval(QUERY_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!(%target, "sending AirPlay mDNS query");
                socket.send_to(&query, target).await?;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                if answers_service(&buf[..len], SERVICE) {
                    tracing::info!(device = %from.ip(), "AirPlay receiver found");
                    return Ok(from.ip());
                }
            }
        }
    }
}

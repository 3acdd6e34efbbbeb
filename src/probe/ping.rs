//! ICMP reachability check with native sockets and `ping` command fallback.
//!
//! Uses blocking sockets in spawn_blocking for sub-millisecond timing precision.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{Endpoint, ProbeError, Reachability};

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where ping_group_range allows it
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Reachability: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Reachability: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }
    tracing::info!("Reachability: native ICMP unavailable, using ping command");
    IcmpCapability::CommandOnly
}

/// Echo-request reachability, one request per attempt.
#[derive(Debug, Default, Clone)]
pub struct IcmpReachability;

#[async_trait]
impl Reachability for IcmpReachability {
    async fn reachable(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Duration, ProbeError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        let ip = endpoint.address;

        if capability == IcmpCapability::Native {
            let result = tokio::task::spawn_blocking(move || blocking_echo(ip, timeout))
                .await
                .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

            match result {
                Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                    tracing::warn!(
                        "Native ICMP denied for {}, falling back to ping command: {}",
                        endpoint,
                        msg
                    );
                }
                other => return other,
            }
        }

        ping_command(ip, timeout).await
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// Per-family ICMP parameters.
struct Family {
    domain: Domain,
    protocol: Protocol,
    echo_request: u8,
    echo_reply: u8,
}

impl Family {
    fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self {
                domain: Domain::IPV4,
                protocol: Protocol::ICMPV4,
                echo_request: 8,
                echo_reply: 0,
            },
            IpAddr::V6(_) => Self {
                domain: Domain::IPV6,
                protocol: Protocol::ICMPV6,
                echo_request: 128,
                echo_reply: 129,
            },
        }
    }
}

/// How the ICMP socket was opened.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SocketKind {
    /// Replies carry the identifier we chose.
    Raw,
    /// The kernel rewrites the identifier and only delivers our own replies.
    Dgram,
}

fn open_icmp_socket(family: &Family) -> Result<(Socket, SocketKind), ProbeError> {
    if let Ok(socket) = Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        return Ok((socket, SocketKind::Raw));
    }
    Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
        .map(|socket| (socket, SocketKind::Dgram))
        .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))
}

/// Time left before `timeout` expires, `None` once it has.
fn remaining(timeout: Duration, elapsed: Duration) -> Option<Duration> {
    timeout.checked_sub(elapsed).filter(|left| !left.is_zero())
}

/// Send one echo request and wait for the matching reply.
fn blocking_echo(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = Family::of(ip);
    let (socket, kind) = open_icmp_socket(&family)?;

    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(family.echo_request, identifier, sequence, ip.is_ipv4());
    let expected_id = match kind {
        SocketKind::Raw => Some(identifier),
        SocketKind::Dgram => None,
    };

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    let mut buf = [0u8; 1500];
    loop {
        let left = remaining(timeout, start.elapsed()).ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(left))
            .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

        let len = (&socket).read(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => ProbeError::Network(format!("Failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }
        if is_matching_reply(&buf[..len], family.echo_reply, expected_id, sequence) {
            return Ok(elapsed);
        }
        // Someone else's packet; keep waiting for ours
    }
}

/// Check whether `buf` is the echo reply for our request.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message.
/// `identifier` is `None` on DGRAM sockets, where the kernel assigns it.
fn is_matching_reply(buf: &[u8], reply_type: u8, identifier: Option<u16>, sequence: u16) -> bool {
    let offset = if reply_type == 0 && buf.first().map(|b| b >> 4) == Some(4) {
        usize::from(buf[0] & 0x0F) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };
    let id_matches = identifier.map_or(true, |id| u16::from_be_bytes([icmp[4], icmp[5]]) == id);
    icmp[0] == reply_type && id_matches && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

/// Build an echo request: 8 byte header + 56 byte payload.
///
/// The ICMPv6 checksum is filled in by the kernel.
fn build_echo_request(kind: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(&rand::random::<u64>().to_be_bytes());

    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Run `ping` once (fallback when ICMP sockets are unavailable).
async fn ping_command(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);
    let program = if ip.is_ipv6() && cfg!(target_os = "macos") { "ping6" } else { "ping" };

    let mut command = Command::new(program);
    command
        .args(["-c", "1", "-W", &timeout_secs.to_string(), &ip.to_string()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // -W is per-reply; bound the whole command as well
    let output = tokio::time::timeout(timeout + Duration::from_secs(1), command.output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() || is_total_loss(&stdout) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_total_loss(&stdout) || stderr.contains("timeout") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}{}", stdout, stderr)));
    }

    parse_ping_output(&stdout)
}

fn is_total_loss(output: &str) -> bool {
    output.contains("100% packet loss") || output.contains("100.0% packet loss")
}

/// Parse ping command output for latency.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    // "time=12.3 ms" on Linux and macOS per-reply lines
    let per_packet = PER_PACKET.get_or_init(|| {
        Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").expect("valid per-packet regex")
    });
    // "round-trip min/avg/max/stddev = ..." (macOS) or "rtt min/avg/max/mdev = ..." (Linux)
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/")
            .expect("valid summary regex")
    });

    per_packet
        .captures(output)
        .or_else(|| summary.captures(output))
        .and_then(|caps| caps.name("ms"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

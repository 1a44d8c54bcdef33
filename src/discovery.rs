//! Receiver discovery over a raw multicast-DNS style wire format.
//!
//! A single PTR query for the NymphCast service is broadcast over UDP and
//! every response arriving within the scan budget is parsed independently.
//! A malformed response is dropped; it never fails the whole scan.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, trace};

use crate::config::DiscoveryConfig;
use crate::types::ServerRecord;
use crate::{Error, Result};

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Flags value every accepted response must carry (response + authoritative).
pub const RESPONSE_FLAGS: u16 = 0x8400;

pub const QTYPE_A: u16 = 0x0001;
pub const QTYPE_PTR: u16 = 0x000C;
pub const QTYPE_AAAA: u16 = 0x001C;
pub const QTYPE_SRV: u16 = 0x0021;
pub const QCLASS_IN: u16 = 0x0001;

/// Name-compression token that must open every answer record.
const COMPRESSION_TOKEN: u8 = 0xC0;

const MAX_LABEL_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 16;
const MAX_DATAGRAM: usize = 9000;

// ============================================================================
// Query encoding
// ============================================================================

/// Encode a PTR query for `service`.
///
/// Layout: 12-byte header (ID=0, flags=0, QDCOUNT=1), the service name as
/// length-prefixed labels, then QTYPE=PTR and QCLASS=IN.
pub fn encode_query(service: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + service.len() + 2 + 4);
    buf.extend_from_slice(&0u16.to_be_bytes()); // ID
    buf.extend_from_slice(&0u16.to_be_bytes()); // flags
    buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    encode_name(service, &mut buf)?;
    buf.extend_from_slice(&QTYPE_PTR.to_be_bytes());
    buf.extend_from_slice(&QCLASS_IN.to_be_bytes());
    Ok(buf)
}

/// Append `name` as length-prefixed labels terminated by a zero byte.
///
/// A single over-long label invalidates the whole encoding.
fn encode_name(name: &str, buf: &mut Vec<u8>) -> Result<()> {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(Error::Discovery(format!(
                "label of {} bytes exceeds {MAX_LABEL_LEN}",
                label.len()
            )));
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    Ok(())
}

// ============================================================================
// Response parsing
// ============================================================================

/// Bounds-checked reader over a received packet.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| truncated(self.pos, 1))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| truncated(self.pos, n))?;
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn name(&mut self) -> Result<String> {
        let (name, next) = decode_name(self.data, self.pos)?;
        self.pos = next;
        Ok(name)
    }
}

fn truncated(pos: usize, wanted: usize) -> Error {
    Error::Parse(format!("need {wanted} bytes at offset {pos}, packet too short"))
}

/// Decode a label sequence starting at `offset`.
///
/// Compression pointers are followed with a hop limit. Returns the dotted
/// name and the offset just past the name at its original position.
fn decode_name(packet: &[u8], mut offset: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut end = None;
    let mut hops = 0;

    loop {
        let len = *packet
            .get(offset)
            .ok_or_else(|| Error::Parse(format!("name runs past end of packet at {offset}")))?
            as usize;

        if len == 0 {
            end.get_or_insert(offset + 1);
            break;
        }

        if len >= COMPRESSION_TOKEN as usize {
            let low = *packet
                .get(offset + 1)
                .ok_or_else(|| Error::Parse("truncated compression pointer".to_string()))?
                as usize;
            end.get_or_insert(offset + 2);
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(Error::Parse("compression pointer loop".to_string()));
            }
            offset = ((len & 0x3F) << 8) | low;
            continue;
        }

        let label = packet
            .get(offset + 1..offset + 1 + len)
            .ok_or_else(|| Error::Parse(format!("label at {offset} runs past end of packet")))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        offset += 1 + len;
    }

    // `end` is always set once the loop exits
    Ok((labels.join("."), end.unwrap_or(offset + 1)))
}

/// One answer record, with the payload already interpreted where understood.
#[derive(Debug)]
enum Answer {
    Ptr { owner: String, target: Option<String> },
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Srv { port: u16 },
    Other { owner: String, rtype: u16 },
}

fn read_answer(reader: &mut Reader<'_>) -> Result<Answer> {
    let token = reader.u8()?;
    if token != COMPRESSION_TOKEN {
        return Err(Error::Parse(format!(
            "answer starts with 0x{token:02x}, expected compression token"
        )));
    }
    let name_offset = reader.u8()? as usize;
    if name_offset >= reader.data.len() {
        return Err(Error::Parse(format!(
            "answer name offset {name_offset} out of bounds"
        )));
    }
    let (owner, _) = decode_name(reader.data, name_offset)?;

    let rtype = reader.u16()?;
    reader.skip(6)?; // class + TTL
    let rdlen = reader.u16()? as usize;
    let rdata_start = reader.pos;
    let rdata = reader.take(rdlen)?;

    trace!(rtype, rdlen, owner = %owner, "RX: answer record");

    let answer = match rtype {
        QTYPE_PTR => {
            // PTR targets are usually compressed against the query name, so
            // decode within the whole packet but bounded by the record.
            let target = decode_name(reader.data, rdata_start)
                .ok()
                .filter(|(_, next)| *next <= rdata_start + rdlen)
                .map(|(name, _)| name);
            Answer::Ptr { owner, target }
        }
        QTYPE_A if rdlen == 4 => Answer::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3])),
        QTYPE_AAAA if rdlen == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Answer::Aaaa(Ipv6Addr::from(octets))
        }
        QTYPE_SRV if rdlen >= 6 => Answer::Srv {
            port: u16::from_be_bytes([rdata[4], rdata[5]]),
        },
        _ => Answer::Other { owner, rtype },
    };
    Ok(answer)
}

/// Parse one raw response received from `source`.
///
/// The response is rejected unless its flags equal [`RESPONSE_FLAGS`], every
/// question carries `expected_qtype`, and every answer record is well formed.
pub fn parse_response(
    packet: &[u8],
    source: SocketAddr,
    expected_qtype: u16,
    default_port: u16,
) -> Result<ServerRecord> {
    let mut reader = Reader::new(packet);

    reader.skip(2)?; // ID
    let flags = reader.u16()?;
    if flags != RESPONSE_FLAGS {
        return Err(Error::Parse(format!("unexpected flags 0x{flags:04x}")));
    }
    let qdcount = reader.u16()?;
    let ancount = reader.u16()?;
    let nscount = reader.u16()?;
    let arcount = reader.u16()?;

    let mut question_name = None;
    for _ in 0..qdcount {
        let qname = reader.name()?;
        let qtype = reader.u16()?;
        if qtype != expected_qtype {
            return Err(Error::Parse(format!(
                "question {qname} has type 0x{qtype:04x}, expected 0x{expected_qtype:04x}"
            )));
        }
        reader.skip(2)?; // QCLASS
        question_name.get_or_insert(qname);
    }

    let total = ancount as usize + nscount as usize + arcount as usize;

    let mut name = None;
    let mut fallback_name = None;
    let mut ipv4 = None;
    let mut ipv6 = None;
    let mut port = default_port;

    for _ in 0..total {
        match read_answer(&mut reader)? {
            Answer::Ptr { owner, target } => {
                if name.is_none() {
                    name = target.and_then(|t| t.split('.').next().map(str::to_string));
                }
                fallback_name.get_or_insert(owner);
            }
            Answer::A(addr) => ipv4 = Some(addr),
            Answer::Aaaa(addr) => ipv6 = Some(addr),
            Answer::Srv { port: p } => port = p,
            Answer::Other { owner, rtype } => {
                trace!(rtype, "Ignoring record type");
                fallback_name.get_or_insert(owner);
            }
        }
    }

    match source.ip() {
        IpAddr::V4(addr) => {
            ipv4.get_or_insert(addr);
        }
        IpAddr::V6(addr) => {
            ipv6.get_or_insert(addr);
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .or(fallback_name)
        .or(question_name)
        .unwrap_or_default();

    Ok(ServerRecord {
        name,
        ipv4: ipv4.map(|a| a.to_string()).unwrap_or_default(),
        ipv6: ipv6.map(|a| a.to_string()).unwrap_or_default(),
        port,
    })
}

// ============================================================================
// Resolver
// ============================================================================

/// Discover receivers using the given settings.
///
/// Socket create/bind/send/receive failures abort the call. Responses that
/// fail to parse are skipped.
pub async fn resolve(config: &DiscoveryConfig) -> Result<Vec<ServerRecord>> {
    let query = encode_query(&config.service)?;

    let socket = UdpSocket::bind(config.bind_addr)
        .await
        .map_err(|e| Error::Discovery(format!("failed to bind: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::Discovery(format!("failed to enable broadcast: {e}")))?;

    socket
        .send_to(&query, config.query_addr)
        .await
        .map_err(|e| Error::Discovery(format!("failed to send query: {e}")))?;
    debug!(
        service = %config.service,
        target = %config.query_addr,
        len = query.len(),
        "TX: discovery query"
    );

    let responses = collect_responses(&socket, config.scan_time()).await?;

    let mut seen = HashSet::new();
    let mut servers = Vec::new();
    for (packet, peer) in responses {
        match parse_response(&packet, peer, QTYPE_PTR, config.server_port) {
            Ok(record) => {
                if seen.insert(record.clone()) {
                    debug!(name = %record.name, peer = %peer, "Found receiver");
                    servers.push(record);
                }
            }
            Err(e) => debug!(peer = %peer, error = %e, "Dropping discovery response"),
        }
    }

    info!(count = servers.len(), "Discovery finished");
    Ok(servers)
}

/// Discover receivers announcing `service` within `scan_time`, using default socket settings.
pub async fn resolve_service(service: &str, scan_time: Duration) -> Result<Vec<ServerRecord>> {
    let config = DiscoveryConfig {
        service: service.to_string(),
        scan_time_secs: scan_time.as_secs().max(1),
        ..Default::default()
    };
    resolve(&config).await
}

async fn collect_responses(
    socket: &UdpSocket,
    budget: Duration,
) -> Result<Vec<(Vec<u8>, SocketAddr)>> {
    let deadline = Instant::now() + budget;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut responses = Vec::new();

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match timeout(deadline - now, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Ok((len, peer))) => {
                trace!(len, peer = %peer, "RX: discovery response");
                responses.push((buf[..len].to_vec(), peer));
            }
            Ok(Err(e)) => return Err(Error::Discovery(format!("failed to receive: {e}"))),
        }
    }

    Ok(responses)
}

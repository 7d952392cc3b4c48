//! Catch-all DNS responder for the setup portal.
//!
//! While the device runs as an access point, every name a client looks up
//! must lead back to the device so phones and laptops raise their
//! captive-portal sheet. A queries get answered with the portal address;
//! other query types get an empty answer so clients move on quickly.

use defmt::{debug, error, info, warn};
use embassy_net::{
    Ipv4Address, Stack,
    udp::{self, UdpSocket},
};

const DNS_PORT: u16 = 53;
const MAX_FRAME: usize = 512;
const HEADER_LEN: usize = 12;
const QTYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const ANSWER_TTL_SECS: u32 = 60;

/// Answer every A query on UDP 53 with the portal's own address.
#[embassy_executor::task]
#[expect(
    clippy::indexing_slicing,
    reason = "received and built lengths never exceed the frame buffers"
)]
pub async fn dns_catchall_task(stack: &'static Stack<'static>, portal_ip: Ipv4Address) -> ! {
    let mut rx_meta = [udp::PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; MAX_FRAME];
    let mut tx_meta = [udp::PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; MAX_FRAME];
    let mut socket = UdpSocket::new(
        *stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );

    if let Err(err) = socket.bind(DNS_PORT) {
        error!("DNS responder failed to bind: {:?}", err);
        core::panic!("Unable to bind DNS port");
    }

    info!("DNS responder started - answering every name with {}", portal_ip);

    let mut frame = [0u8; MAX_FRAME];
    let mut response = [0u8; MAX_FRAME];

    loop {
        let Ok((len, remote)) = socket.recv_from(&mut frame).await else {
            continue;
        };

        let Some(response_len) = answer_query(&frame[..len], &mut response, portal_ip) else {
            continue;
        };

        if let Err(err) = socket.send_to(&response[..response_len], remote).await {
            warn!("DNS send error: {:?}", err);
        } else {
            debug!("DNS query answered with {}", portal_ip);
        }
    }
}

/// Build the response for one query frame. Returns `None` when the frame
/// is not a standard query, so the caller drops it silently.
#[expect(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "offsets are checked against the frame length before use"
)]
fn answer_query(
    query: &[u8],
    response: &mut [u8; MAX_FRAME],
    portal_ip: Ipv4Address,
) -> Option<usize> {
    if query.len() < HEADER_LEN {
        return None;
    }
    // QR must be 0 (query) and the opcode 0 (standard query).
    if query[2] & 0xF8 != 0 {
        return None;
    }
    let question_count = u16::from_be_bytes([query[4], query[5]]);
    if question_count == 0 {
        return None;
    }

    // Echo the header and the first question, nothing after it.
    let question_end = skip_name(query, HEADER_LEN)?.checked_add(4)?;
    if question_end > query.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([query[question_end - 4], query[question_end - 3]]);

    response[..question_end].copy_from_slice(&query[..question_end]);
    // QR=1, AA=1, RD copied through; no recursion on offer.
    response[2] = 0x84 | (query[2] & 0x01);
    response[3] = 0x00;
    response[4..6].copy_from_slice(&1u16.to_be_bytes());
    let answer_count: u16 = if qtype == QTYPE_A { 1 } else { 0 };
    response[6..8].copy_from_slice(&answer_count.to_be_bytes());
    response[8..12].fill(0);

    if answer_count == 0 {
        return Some(question_end);
    }

    let mut pos = question_end;
    if pos + 16 > response.len() {
        return None;
    }

    // Answer record: compressed pointer back to the question name.
    response[pos..pos + 2].copy_from_slice(&[0xC0, 0x0C]);
    pos += 2;
    response[pos..pos + 2].copy_from_slice(&QTYPE_A.to_be_bytes());
    pos += 2;
    response[pos..pos + 2].copy_from_slice(&CLASS_IN.to_be_bytes());
    pos += 2;
    response[pos..pos + 4].copy_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
    pos += 4;
    response[pos..pos + 2].copy_from_slice(&4u16.to_be_bytes());
    pos += 2;
    response[pos..pos + 4].copy_from_slice(&portal_ip.octets());
    pos += 4;

    Some(pos)
}

/// Step over a DNS name starting at `pos`, returning the offset just past it.
#[expect(
    clippy::arithmetic_side_effects,
    reason = "positions stay within the 512-byte frame"
)]
fn skip_name(frame: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = usize::from(*frame.get(pos)?);
        if len == 0 {
            return Some(pos + 1);
        }
        // A compressed label pointer ends the name in two bytes.
        if len & 0xC0 == 0xC0 {
            return Some(pos + 2);
        }
        pos += 1 + len;
    }
}

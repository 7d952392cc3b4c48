//! Minimal DHCP lease responder for the setup portal.
//!
//! Hands out a handful of short leases so a phone or laptop can join the
//! access point without manual addressing. Short lease times keep clients
//! re-checking in, which also re-triggers captive-portal detection.
//! Requests for an address we cannot honor are NAKed so the client starts
//! over with a fresh DISCOVER instead of keeping a stale address.

use defmt::{debug, error, info, warn};
use embassy_net::{
    Ipv4Address, Stack,
    udp::{self, UdpSocket},
};
use embassy_time::{Duration, Instant};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTIONS_OFFSET: usize = 240;
// Short leases keep portal clients refreshing quickly.
const LEASE_SECONDS: u32 = 30;
const MAX_LEASES: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
enum MessageKind {
    Discover,
    Request,
    Decline,
    Release,
    Inform,
    Other(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
enum ReplyKind {
    Offer,
    Ack,
    Nak,
}

impl ReplyKind {
    const fn code(self) -> u8 {
        match self {
            Self::Offer => 2,
            Self::Ack => 5,
            Self::Nak => 6,
        }
    }
}

/// The fields of a BOOTREQUEST we act on.
struct BootRequest {
    kind: MessageKind,
    transaction_id: u32,
    flags: u16,
    client_mac: [u8; 6],
    current_ip: Option<Ipv4Address>,
    requested_ip: Option<Ipv4Address>,
    server_id: Option<Ipv4Address>,
}

struct Lease {
    mac: [u8; 6],
    address: Ipv4Address,
    expires_at: Instant,
}

/// A contiguous block of addresses with at most [`MAX_LEASES`] live leases.
struct LeasePool {
    start: Ipv4Address,
    size: u8,
    leases: heapless::Vec<Lease, MAX_LEASES>,
}

impl LeasePool {
    fn new(start: Ipv4Address, size: u8) -> Self {
        Self {
            start,
            size,
            leases: heapless::Vec::new(),
        }
    }

    fn contains(&self, address: Ipv4Address) -> bool {
        let first = self.start.to_bits();
        let end = first.saturating_add(u32::from(self.size));
        (first..end).contains(&address.to_bits())
    }

    fn drop_expired(&mut self) {
        let now = Instant::now();
        self.leases.retain(|lease| lease.expires_at > now);
    }

    #[expect(
        clippy::arithmetic_side_effects,
        reason = "the lease horizon is far below the timer range"
    )]
    fn fresh_expiry() -> Instant {
        Instant::now() + Duration::from_secs(u64::from(LEASE_SECONDS))
    }

    /// Pick an address for a DISCOVER: the client's existing lease, its
    /// preference when that is free, otherwise the first free address.
    fn allocate(&mut self, mac: [u8; 6], preferred: Option<Ipv4Address>) -> Option<Ipv4Address> {
        self.drop_expired();

        let preferred = preferred
            .filter(|address| self.contains(*address))
            .filter(|address| self.owner(*address).is_none_or(|owner| owner == mac));

        if let Some(lease) = self.leases.iter_mut().find(|lease| lease.mac == mac) {
            if let Some(address) = preferred {
                lease.address = address;
            }
            lease.expires_at = Self::fresh_expiry();
            return Some(lease.address);
        }

        let address = preferred.or_else(|| self.first_free())?;
        self.leases
            .push(Lease {
                mac,
                address,
                expires_at: Self::fresh_expiry(),
            })
            .ok()?;
        Some(address)
    }

    /// Grant a REQUEST for a specific address, or refuse it.
    fn confirm(&mut self, mac: [u8; 6], wanted: Ipv4Address) -> Option<Ipv4Address> {
        self.drop_expired();

        if !self.contains(wanted) {
            return None;
        }
        if self.owner(wanted).is_some_and(|owner| owner != mac) {
            return None;
        }

        if let Some(lease) = self.leases.iter_mut().find(|lease| lease.mac == mac) {
            lease.address = wanted;
            lease.expires_at = Self::fresh_expiry();
            return Some(wanted);
        }
        self.leases
            .push(Lease {
                mac,
                address: wanted,
                expires_at: Self::fresh_expiry(),
            })
            .ok()?;
        Some(wanted)
    }

    /// Refresh a REQUEST that named no address at all.
    fn renew(&mut self, mac: [u8; 6]) -> Option<Ipv4Address> {
        self.drop_expired();
        let lease = self.leases.iter_mut().find(|lease| lease.mac == mac)?;
        lease.expires_at = Self::fresh_expiry();
        Some(lease.address)
    }

    fn release(&mut self, mac: [u8; 6]) {
        self.leases.retain(|lease| lease.mac != mac);
    }

    fn owner(&self, address: Ipv4Address) -> Option<[u8; 6]> {
        self.leases
            .iter()
            .find(|lease| lease.address == address)
            .map(|lease| lease.mac)
    }

    fn first_free(&self) -> Option<Ipv4Address> {
        let base = self.start.to_bits();
        (0..u32::from(self.size))
            .map(|offset| Ipv4Address::from_bits(base.saturating_add(offset)))
            .find(|candidate| self.owner(*candidate).is_none())
    }
}

#[expect(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "frame length is checked before the fixed-offset reads"
)]
fn parse_request(frame: &[u8]) -> Option<BootRequest> {
    if frame.len() < OPTIONS_OFFSET {
        return None;
    }

    // BOOTREQUEST from an Ethernet client with a 6-byte MAC, nothing else.
    if frame[0] != 1 || frame[1] != 1 || frame[2] != 6 {
        return None;
    }
    if frame[236..240] != MAGIC_COOKIE {
        return None;
    }

    let transaction_id = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let flags = u16::from_be_bytes([frame[10], frame[11]]);

    let ciaddr = Ipv4Address::new(frame[12], frame[13], frame[14], frame[15]);
    let current_ip = (ciaddr != Ipv4Address::UNSPECIFIED).then_some(ciaddr);

    let mut client_mac = [0u8; 6];
    client_mac.copy_from_slice(&frame[28..34]);

    let mut kind = None;
    let mut requested_ip = None;
    let mut server_id = None;

    let mut idx = OPTIONS_OFFSET;
    while idx < frame.len() {
        let option = frame[idx];
        idx += 1;
        match option {
            0 => continue,
            255 => break,
            _ => {
                let len = usize::from(*frame.get(idx)?);
                idx += 1;
                let data = frame.get(idx..idx + len)?;
                match option {
                    50 if len == 4 => {
                        requested_ip = Some(Ipv4Address::new(data[0], data[1], data[2], data[3]));
                    }
                    53 if len == 1 => {
                        kind = Some(match data[0] {
                            1 => MessageKind::Discover,
                            3 => MessageKind::Request,
                            4 => MessageKind::Decline,
                            7 => MessageKind::Release,
                            8 => MessageKind::Inform,
                            other => MessageKind::Other(other),
                        });
                    }
                    54 if len == 4 => {
                        server_id = Some(Ipv4Address::new(data[0], data[1], data[2], data[3]));
                    }
                    _ => {}
                }
                idx += len;
            }
        }
    }

    Some(BootRequest {
        kind: kind?,
        transaction_id,
        flags,
        client_mac,
        current_ip,
        requested_ip,
        server_id,
    })
}

#[expect(clippy::indexing_slicing, reason = "length checked above")]
fn append_option(dest: &mut [u8], code: u8, payload: &[u8]) -> Option<usize> {
    let needed = payload.len().saturating_add(2);
    if dest.len() < needed {
        return None;
    }
    dest[0] = code;
    dest[1] = u8::try_from(payload.len()).ok()?;
    dest[2..needed].copy_from_slice(payload);
    Some(needed)
}

#[expect(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::indexing_slicing,
    clippy::integer_division_remainder_used,
    reason = "offsets and timer math stay inside the 300-byte minimum checked at entry"
)]
fn build_reply(
    scratch: &mut [u8],
    request: &BootRequest,
    reply: ReplyKind,
    granted_ip: Ipv4Address,
    server_ip: Ipv4Address,
    netmask: Ipv4Address,
    broadcast_ip: Ipv4Address,
) -> Option<usize> {
    if scratch.len() < 300 {
        return None;
    }

    scratch.fill(0);
    scratch[0] = 2; // BOOTREPLY
    scratch[1] = 1; // Ethernet
    scratch[2] = 6;
    scratch[4..8].copy_from_slice(&request.transaction_id.to_be_bytes());
    scratch[10..12].copy_from_slice(&request.flags.to_be_bytes());

    let server_bytes = server_ip.octets();
    // A NAK carries no address assignment at all.
    if reply != ReplyKind::Nak {
        scratch[16..20].copy_from_slice(&granted_ip.octets());
        scratch[20..24].copy_from_slice(&server_bytes);
    }
    scratch[28..34].copy_from_slice(&request.client_mac);
    scratch[236..240].copy_from_slice(&MAGIC_COOKIE);

    let mut idx = OPTIONS_OFFSET;
    idx += append_option(&mut scratch[idx..], 53, &[reply.code()])?;
    idx += append_option(&mut scratch[idx..], 54, &server_bytes)?; // Server identifier

    if reply != ReplyKind::Nak {
        let lease = LEASE_SECONDS;
        let renewal = lease / 2;
        let rebinding = (u64::from(lease) * 7 / 8) as u32;

        idx += append_option(&mut scratch[idx..], 51, &lease.to_be_bytes())?; // Lease time
        idx += append_option(&mut scratch[idx..], 58, &renewal.to_be_bytes())?; // Renewal (T1)
        idx += append_option(&mut scratch[idx..], 59, &rebinding.to_be_bytes())?; // Rebinding (T2)
        idx += append_option(&mut scratch[idx..], 1, &netmask.octets())?; // Subnet mask
        idx += append_option(&mut scratch[idx..], 3, &server_bytes)?; // Router
        idx += append_option(&mut scratch[idx..], 6, &server_bytes)?; // DNS server
        idx += append_option(&mut scratch[idx..], 28, &broadcast_ip.octets())?; // Broadcast
    }

    *scratch.get_mut(idx)? = 255; // End option
    idx += 1;

    Some(idx)
}

fn broadcast_address(server_ip: Ipv4Address, netmask: Ipv4Address) -> Ipv4Address {
    Ipv4Address::from_bits(server_ip.to_bits() | !netmask.to_bits())
}

/// Serve leases from `pool_start .. pool_start + pool_size` on UDP 67.
#[embassy_executor::task]
#[expect(
    clippy::indexing_slicing,
    reason = "received and built lengths never exceed the frame buffers"
)]
pub async fn dhcp_lease_task(
    stack: &'static Stack<'static>,
    server_ip: Ipv4Address,
    netmask: Ipv4Address,
    pool_start: Ipv4Address,
    pool_size: u8,
) -> ! {
    let mut rx_meta = [udp::PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 768];
    let mut tx_meta = [udp::PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; 768];
    let mut socket = UdpSocket::new(
        *stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );

    if let Err(err) = socket.bind(DHCP_SERVER_PORT) {
        error!("DHCP server failed to bind: {:?}", err);
        core::panic!("Unable to bind DHCP port");
    }

    let broadcast_ip = broadcast_address(server_ip, netmask);
    info!(
        "DHCP server listening on {}, pool {} (+{})",
        server_ip, pool_start, pool_size
    );

    let mut pool = LeasePool::new(pool_start, pool_size);
    let mut frame = [0u8; 768];
    let mut response = [0u8; 768];

    loop {
        let (len, _remote) = match socket.recv_from(&mut frame).await {
            Ok(received) => received,
            Err(err) => {
                warn!("DHCP recv error: {:?}", err);
                continue;
            }
        };

        let Some(request) = parse_request(&frame[..len]) else {
            continue;
        };

        debug!(
            "DHCP {:?} from {:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            request.kind,
            request.client_mac[0],
            request.client_mac[1],
            request.client_mac[2],
            request.client_mac[3],
            request.client_mac[4],
            request.client_mac[5]
        );

        let (reply, granted_ip) = match request.kind {
            MessageKind::Discover => {
                let Some(offer) = pool.allocate(request.client_mac, request.requested_ip) else {
                    warn!("DHCP address pool exhausted");
                    continue;
                };
                (ReplyKind::Offer, offer)
            }
            MessageKind::Request => {
                // A client answering some other server's offer is not ours
                // to correct.
                if request.server_id.is_some_and(|id| id != server_ip) {
                    continue;
                }
                let granted = match request.requested_ip.or(request.current_ip) {
                    Some(wanted) => pool.confirm(request.client_mac, wanted),
                    None => pool.renew(request.client_mac),
                };
                match granted {
                    Some(address) => (ReplyKind::Ack, address),
                    None => (ReplyKind::Nak, Ipv4Address::UNSPECIFIED),
                }
            }
            MessageKind::Decline | MessageKind::Release => {
                pool.release(request.client_mac);
                continue;
            }
            MessageKind::Inform | MessageKind::Other(_) => continue,
        };

        let Some(response_len) = build_reply(
            &mut response,
            &request,
            reply,
            granted_ip,
            server_ip,
            netmask,
            broadcast_ip,
        ) else {
            warn!("Failed to build DHCP reply");
            continue;
        };

        if let Err(err) = socket
            .send_to(&response[..response_len], (broadcast_ip, DHCP_CLIENT_PORT))
            .await
        {
            warn!("DHCP send error: {:?}", err);
        } else {
            debug!("DHCP {:?} carrying {}", reply, granted_ip);
        }
    }
}

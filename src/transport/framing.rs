//! Packet framing shared by the USB transports.
//!
//! A logical message is `[0x3F][type: u16 BE][length: u32 BE][payload]`, cut
//! into fixed-size reports. Every report starts with the `0x3F` marker; the
//! first also carries the rest of the header, continuation reports carry only
//! the marker followed by payload bytes. Reports are zero-padded.

use bytes::{BufMut, BytesMut};
use log::{debug, error};

use crate::error::{Error, Result};

pub const MARKER: u8 = 0x3F;
/// USB HID report size.
pub const PACKET_SIZE: usize = 64;
pub const HEADER_LEN: usize = 7;
/// Upper bound on a declared payload length; firmware images are the largest messages.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Serialises the logical message (header + payload) without splitting it.
pub fn encode_frame(message_type: u16, payload: &[u8]) -> Result<BytesMut> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|l| (*l as usize) <= MAX_MESSAGE_LEN)
        .ok_or_else(|| Error::Codec(format!("payload of {} bytes is too large", payload.len())))?;
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(MARKER);
    frame.put_u16(message_type);
    frame.put_u32(len);
    frame.put_slice(payload);
    Ok(frame)
}

/// Splits one message into `packet_size` reports ready to write.
pub fn split_packets(message_type: u16, payload: &[u8], packet_size: usize) -> Result<Vec<Vec<u8>>> {
    if packet_size <= HEADER_LEN {
        return Err(Error::Codec(format!("packet size {packet_size} cannot hold a header")));
    }
    let frame = encode_frame(message_type, payload)?;

    let first_len = frame.len().min(packet_size);
    let mut packets = Vec::with_capacity(1 + payload.len() / (packet_size - 1));
    packets.push(padded(&frame[..first_len], packet_size));

    for chunk in frame[first_len..].chunks(packet_size - 1) {
        let mut packet = Vec::with_capacity(packet_size);
        packet.push(MARKER);
        packet.extend_from_slice(chunk);
        packets.push(padded(&packet, packet_size));
    }

    debug!(
        "framing: type {} ({} payload bytes) -> {} packets",
        message_type,
        payload.len(),
        packets.len()
    );
    Ok(packets)
}

fn padded(bytes: &[u8], packet_size: usize) -> Vec<u8> {
    let mut packet = bytes.to_vec();
    packet.resize(packet_size, 0);
    packet
}

/// Incremental receiver for one logical message.
#[derive(Debug, Default)]
pub struct Reassembler {
    header: Option<(u16, usize)>,
    payload: BytesMut,
    packets: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received report. Returns the message once its declared
    /// length has been reached, truncated to exactly that length.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<(u16, Vec<u8>)>> {
        if packet.is_empty() {
            error!("framing: empty read after {} packets", self.packets);
            return Err(Error::Transport(
                "device returned no data before the message was complete".into(),
            ));
        }
        if packet[0] != MARKER {
            return Err(Error::Transport(format!(
                "invalid packet marker 0x{:02x} in packet {}",
                packet[0],
                self.packets + 1
            )));
        }
        self.packets += 1;

        let (message_type, declared) = match self.header {
            Some(header) => {
                self.payload.extend_from_slice(&packet[1..]);
                header
            }
            None => {
                if packet.len() < HEADER_LEN {
                    return Err(Error::Transport(format!(
                        "first packet too short for header ({} bytes)",
                        packet.len()
                    )));
                }
                let message_type = u16::from_be_bytes([packet[1], packet[2]]);
                let declared =
                    u32::from_be_bytes([packet[3], packet[4], packet[5], packet[6]]) as usize;
                if declared > MAX_MESSAGE_LEN {
                    return Err(Error::Transport(format!(
                        "declared message length {declared} exceeds limit"
                    )));
                }
                debug!("framing: receiving type {message_type}, {declared} bytes");
                self.header = Some((message_type, declared));
                self.payload.reserve(declared);
                self.payload.extend_from_slice(&packet[HEADER_LEN..]);
                (message_type, declared)
            }
        };

        if self.payload.len() < declared {
            return Ok(None);
        }
        let mut payload = std::mem::take(&mut self.payload);
        payload.truncate(declared);
        debug!("framing: complete after {} packets", self.packets);
        self.header = None;
        self.packets = 0;
        Ok(Some((message_type, payload.to_vec())))
    }
}

/// Reads reports through `read_packet` until one message is complete.
pub fn read_message<F>(mut read_packet: F, packet_size: usize) -> Result<(u16, Vec<u8>)>
where
    F: FnMut(&mut [u8]) -> Result<usize>,
{
    let mut reassembler = Reassembler::new();
    let mut buf = vec![0u8; packet_size];
    loop {
        buf.fill(0);
        let n = read_packet(&mut buf)?;
        if let Some(message) = reassembler.push(&buf[..n.min(packet_size)])? {
            return Ok(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(len: usize, packet_size: usize) {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let packets = split_packets(0x1234, &payload, packet_size).unwrap();
        assert!(packets.iter().all(|p| p.len() == packet_size && p[0] == MARKER));

        let mut it = packets.into_iter();
        let (t, out) = read_message(
            |buf| {
                let p = it.next().expect("reader asked for more packets than written");
                buf[..p.len()].copy_from_slice(&p);
                Ok(p.len())
            },
            packet_size,
        )
        .unwrap();
        assert_eq!(t, 0x1234);
        assert_eq!(out, payload, "len {len}, packet size {packet_size}");
        assert!(it.next().is_none(), "unread packets for len {len}");
    }

    #[test]
    fn round_trips_across_boundaries() {
        for packet_size in [16, PACKET_SIZE] {
            let first = packet_size - HEADER_LEN;
            let cont = packet_size - 1;
            for len in [0, 1, first - 1, first, first + 1, first + cont, packet_size, packet_size * 2, 1000] {
                round_trip(len, packet_size);
            }
        }
    }

    #[test]
    fn header_layout_is_big_endian() {
        let packets = split_packets(29, &[0xAA; 3], PACKET_SIZE).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..10], &[0x3F, 0x00, 0x1D, 0, 0, 0, 3, 0xAA, 0xAA, 0xAA]);
        assert!(packets[0][10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn continuation_packets_carry_only_marker() {
        let payload = vec![1u8; PACKET_SIZE];
        let packets = split_packets(1, &payload, PACKET_SIZE).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1][0], MARKER);
        // 57 bytes in the first packet, 7 in the second
        assert!(packets[1][1..8].iter().all(|&b| b == 1));
        assert!(packets[1][8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_read_mid_message_is_transport_error() {
        let packets = split_packets(1, &[9u8; 200], PACKET_SIZE).unwrap();
        let mut served = 0;
        let err = read_message(
            |buf| {
                if served == 0 {
                    served += 1;
                    buf.copy_from_slice(&packets[0]);
                    Ok(PACKET_SIZE)
                } else {
                    Ok(0)
                }
            },
            PACKET_SIZE,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TransportError);
    }

    #[test]
    fn bad_marker_is_rejected() {
        let mut r = Reassembler::new();
        assert!(r.push(&[0x00, 0, 1, 0, 0, 0, 0]).is_err());
    }
}

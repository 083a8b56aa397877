use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};
use etherparse::{Ipv4Header, UdpHeader};

use crate::protocol::{Protocol, RIP_PORT};

/// Offset of the header checksum field
const CHECKSUM_OFFSET: usize = 10;
/// Offset of the TTL byte
const TTL_OFFSET: usize = 8;

pub const MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// RIP responses only ever cross one link
const RIP_TTL: u8 = 1;

/// Header length in bytes, as declared by the IHL field.
pub fn header_len(packet: &[u8]) -> usize {
  4 * usize::from(packet[0] & 0xf)
}

/// The Total Length header field.
pub fn total_len(packet: &[u8]) -> u16 {
  u16::from_be_bytes([packet[2], packet[3]])
}

pub fn protocol(packet: &[u8]) -> u8 {
  packet[9]
}

pub fn source_address(packet: &[u8]) -> Ipv4Addr {
  Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15])
}

pub fn destination_address(packet: &[u8]) -> Ipv4Addr {
  Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19])
}

/// Bytes following the IPv4 header. Callers must have validated the header
/// first.
pub fn payload(packet: &[u8]) -> &[u8] {
  &packet[header_len(packet)..]
}

/// Destination port of the UDP header following the IPv4 header, if the
/// packet is long enough to carry one.
pub fn udp_destination_port(packet: &[u8]) -> Option<u16> {
  let start = header_len(packet);
  if packet.len() < start + UDP_HEADER_LEN {
    return None;
  }
  Some(u16::from_be_bytes([packet[start + 2], packet[start + 3]]))
}

/// One's-complement sum of the header's 16-bit words with the checksum
/// field treated as zero and end-around carries folded back in. Returns the
/// complement, i.e. the value the checksum field must hold.
fn header_checksum(header: &[u8]) -> u16 {
  let mut sum: u32 = 0;
  for i in (0..header.len()).step_by(2) {
    if i == CHECKSUM_OFFSET {
      continue;
    }
    sum += u32::from(u16::from_be_bytes([header[i], header[i + 1]]));
  }
  sum = (sum >> 16) + (sum & 0xffff);
  sum += sum >> 16;
  !(sum as u16)
}

/// Recomputes the header checksum over the declared header length and
/// compares it with the stored field. A buffer shorter than its own header,
/// or a header length below 20, fails closed.
pub fn validate_checksum(packet: &[u8]) -> bool {
  if packet.is_empty() {
    return false;
  }
  let len = header_len(packet);
  if len < MIN_HEADER_LEN || packet.len() < len {
    return false;
  }
  let stored = u16::from_be_bytes([packet[CHECKSUM_OFFSET], packet[CHECKSUM_OFFSET + 1]]);
  stored == header_checksum(&packet[..len])
}

/// Rewrites `packet` in place for forwarding: decrements the TTL byte and
/// refreshes the checksum field. Returns false, leaving the buffer
/// untouched, when the incoming checksum does not verify. TTL reaching
/// zero is the caller's concern.
pub fn forward(packet: &mut [u8]) -> bool {
  if !validate_checksum(packet) {
    return false;
  }
  packet[TTL_OFFSET] = packet[TTL_OFFSET].wrapping_sub(1);
  let len = header_len(packet);
  let checksum = header_checksum(&packet[..len]);
  packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
  true
}

/// Wraps `payload` in an IPv4 header and returns the complete datagram.
pub fn build_datagram(
  source: Ipv4Addr,
  destination: Ipv4Addr,
  protocol: Protocol,
  time_to_live: u8,
  payload: &[u8],
) -> Result<Vec<u8>> {
  let payload_len = u16::try_from(payload.len())
    .map_err(|_| anyhow!("payload of {} bytes does not fit a datagram", payload.len()))?;
  let mut header = Ipv4Header::new(
    payload_len,
    time_to_live,
    protocol.into(),
    source.octets(),
    destination.octets(),
  );
  header.identification = rand::random();
  header.dont_fragment = true;

  let mut buffer = Vec::with_capacity(MIN_HEADER_LEN + payload.len());
  header
    .write(&mut buffer)
    .map_err(|e| anyhow!("writing ipv4 header: {e:?}"))?;
  buffer.extend_from_slice(payload);
  Ok(buffer)
}

/// Wraps a packed RIP message in UDP and IPv4 headers, both ports 520.
pub fn build_rip_datagram(
  source: Ipv4Addr,
  destination: Ipv4Addr,
  rip_payload: &[u8],
) -> Result<Vec<u8>> {
  let udp = UdpHeader::without_ipv4_checksum(RIP_PORT, RIP_PORT, rip_payload.len())
    .map_err(|e| anyhow!("building udp header: {e:?}"))?;
  let mut payload = Vec::with_capacity(UDP_HEADER_LEN + rip_payload.len());
  udp
    .write(&mut payload)
    .map_err(|e| anyhow!("writing udp header: {e:?}"))?;
  payload.extend_from_slice(rip_payload);
  build_datagram(source, destination, Protocol::Udp, RIP_TTL, &payload)
}

#[cfg(test)]
mod tests {
  use super::*;

  // 20-byte header with a correct checksum of 0xb861
  // (192.168.0.1 -> 192.168.0.199, TTL 64, UDP)
  const SAMPLE_HEADER: [u8; 20] = [
    0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8, 0x00,
    0x01, 0xc0, 0xa8, 0x00, 0xc7,
  ];

  #[test]
  fn validates_known_good_header() {
    assert!(validate_checksum(&SAMPLE_HEADER));
  }

  #[test]
  fn any_single_bit_flip_is_detected() {
    for i in 0..SAMPLE_HEADER.len() {
      for bit in 0..8 {
        let mut corrupted = SAMPLE_HEADER;
        corrupted[i] ^= 1 << bit;
        assert!(
          !validate_checksum(&corrupted),
          "flip of byte {i} bit {bit} went undetected"
        );
      }
    }
  }

  #[test]
  fn rejects_truncated_header() {
    assert!(!validate_checksum(&SAMPLE_HEADER[..19]));
    assert!(!validate_checksum(&[]));
  }

  #[test]
  fn checksum_agrees_with_etherparse() {
    let header = Ipv4Header::new(100, 64, 17, [10, 0, 0, 1], [10, 0, 1, 1]);
    let mut bytes = Vec::new();
    // write() fills in the checksum etherparse computed
    header.write(&mut bytes).unwrap();
    assert!(validate_checksum(&bytes));
  }

  #[test]
  fn forward_decrements_ttl_and_refreshes_checksum() {
    let mut packet = SAMPLE_HEADER;
    assert!(forward(&mut packet));
    assert_eq!(packet[8], 0x3f);
    assert!(validate_checksum(&packet));
    // only the TTL and checksum bytes may change
    for (i, (before, after)) in SAMPLE_HEADER.iter().zip(packet.iter()).enumerate() {
      if i != 8 && i != 10 && i != 11 {
        assert_eq!(before, after, "byte {i} changed");
      }
    }
  }

  #[test]
  fn forward_leaves_invalid_packet_untouched() {
    let mut packet = SAMPLE_HEADER;
    packet[11] ^= 0xff;
    let before = packet;
    assert!(!forward(&mut packet));
    assert_eq!(packet, before);
  }

  #[test]
  fn builds_a_valid_rip_datagram() {
    let source = Ipv4Addr::new(10, 0, 0, 1);
    let destination = Ipv4Addr::new(224, 0, 0, 9);
    let datagram = build_rip_datagram(source, destination, &[0u8; 24]).unwrap();

    assert!(validate_checksum(&datagram));
    assert_eq!(header_len(&datagram), MIN_HEADER_LEN);
    assert_eq!(usize::from(total_len(&datagram)), datagram.len());
    assert_eq!(protocol(&datagram), 17);
    assert_eq!(source_address(&datagram), source);
    assert_eq!(destination_address(&datagram), destination);
    assert_eq!(udp_destination_port(&datagram), Some(RIP_PORT));
  }

  #[test]
  fn build_datagram_rejects_oversized_payload() {
    let payload = vec![0u8; usize::from(u16::MAX) + 1];
    let source = Ipv4Addr::new(10, 0, 0, 1);
    let destination = Ipv4Addr::new(10, 0, 1, 1);
    assert!(build_datagram(source, destination, Protocol::Test, 16, &payload).is_err());
  }
}

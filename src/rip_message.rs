use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};

use crate::ip_packet;

/// Hop count at and above which a destination is unreachable
pub const INFINITY_COST: u32 = 16;
/// Wire-format ceiling on entries per message
pub const MAX_ENTRIES: usize = 25;

const RIP_VERSION: u8 = 2;
const HEADER_SIZE: usize = 4;
const ENTRY_SIZE: usize = 20;
/// Address family identifier carried by response entries
const FAMILY_IP: u16 = 2;
/// Address family identifier carried by request entries
const FAMILY_UNSPECIFIED: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipCommand {
  Request,
  Response,
}

/// One advertised route. All metrics in structured form are host order;
/// `pack`/`unpack` convert at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipEntry {
  pub address: Ipv4Addr,
  pub mask: Ipv4Addr,
  pub next_hop: Ipv4Addr,
  pub metric: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipMsg {
  pub command: RipCommand,
  pub entries: Vec<RipEntry>,
}

/// True when `mask`, read most-significant bit first, is a contiguous run
/// of ones followed only by zeros.
pub fn is_contiguous_mask(mask: u32) -> bool {
  mask.count_ones() + mask.trailing_zeros() == 32
}

/// Network mask with `len` leading one bits, `len` in [0, 32].
pub fn mask_from_prefix_len(len: u8) -> u32 {
  debug_assert!(len <= 32);
  match len {
    0 => 0,
    len => u32::MAX << (32 - u32::from(len)),
  }
}

/// Prefix length of a contiguous mask.
pub fn prefix_len_from_mask(mask: u32) -> u8 {
  mask.leading_ones() as u8
}

impl RipMsg {
  /// Parses the RIP message carried by an IPv4/UDP datagram, given the
  /// datagram exactly as delivered. Any malformed field rejects the whole
  /// message; nothing partial is ever returned.
  pub fn unpack(packet: &[u8]) -> Result<RipMsg> {
    if packet.len() < ip_packet::MIN_HEADER_LEN {
      return Err(anyhow!(
        "{} bytes cannot hold an IP header",
        packet.len()
      ));
    }
    let total_length = usize::from(ip_packet::total_len(packet));
    if total_length > packet.len() {
      return Err(anyhow!(
        "IP total length {total_length} exceeds the {} delivered bytes",
        packet.len()
      ));
    }

    let rip_start = ip_packet::header_len(packet) + ip_packet::UDP_HEADER_LEN;
    if packet.len() < rip_start + HEADER_SIZE {
      return Err(anyhow!("datagram too short for a RIP header"));
    }
    let rip = &packet[rip_start..];

    let command = match rip[0] {
      1 => RipCommand::Request,
      2 => RipCommand::Response,
      other => return Err(anyhow!("Invalid command {other}")),
    };
    if rip[1] != RIP_VERSION {
      return Err(anyhow!("Unsupported version {}", rip[1]));
    }
    if rip[2] != 0 || rip[3] != 0 {
      return Err(anyhow!("Reserved header bytes must be zero"));
    }

    let count = (rip.len() - HEADER_SIZE) / ENTRY_SIZE;
    if count > MAX_ENTRIES {
      return Err(anyhow!(
        "{count} entries exceeds the RIP maximum of {MAX_ENTRIES}"
      ));
    }

    let mut entries = Vec::with_capacity(count);
    for chunk in rip[HEADER_SIZE..HEADER_SIZE + count * ENTRY_SIZE].chunks_exact(ENTRY_SIZE) {
      entries.push(RipEntry::unpack(command, chunk)?);
    }

    Ok(RipMsg { command, entries })
  }

  /// Serializes the 4-byte RIP header and 20 bytes per entry. The caller
  /// keeps messages within the 25-entry wire ceiling.
  pub fn pack(&self) -> Vec<u8> {
    debug_assert!(self.entries.len() <= MAX_ENTRIES);
    let command = match self.command {
      RipCommand::Request => 1u8,
      RipCommand::Response => 2u8,
    };

    let mut buffer = Vec::with_capacity(HEADER_SIZE + self.entries.len() * ENTRY_SIZE);
    buffer.push(command);
    buffer.push(RIP_VERSION);
    buffer.extend_from_slice(&[0, 0]);
    for entry in &self.entries {
      entry.pack(self.command, &mut buffer);
    }
    buffer
  }
}

impl RipEntry {
  fn unpack(command: RipCommand, bytes: &[u8]) -> Result<RipEntry> {
    let family = u16::from_be_bytes([bytes[0], bytes[1]]);
    let expected_family = match command {
      RipCommand::Request => FAMILY_UNSPECIFIED,
      RipCommand::Response => FAMILY_IP,
    };
    if family != expected_family {
      return Err(anyhow!("Family {family} does not match the command"));
    }

    let tag = u16::from_be_bytes([bytes[2], bytes[3]]);
    if tag != 0 {
      return Err(anyhow!("Nonzero route tag {tag}"));
    }

    let mask = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    if !is_contiguous_mask(mask) {
      return Err(anyhow!("Mask {mask:#010x} is not a contiguous prefix mask"));
    }

    let metric = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
    if !(1..=INFINITY_COST).contains(&metric) {
      return Err(anyhow!("Metric {metric} outside [1, {INFINITY_COST}]"));
    }

    Ok(RipEntry {
      address: Ipv4Addr::from(u32::from_be_bytes(bytes[4..8].try_into().unwrap())),
      mask: Ipv4Addr::from(mask),
      next_hop: Ipv4Addr::from(u32::from_be_bytes(bytes[12..16].try_into().unwrap())),
      metric,
    })
  }

  fn pack(&self, command: RipCommand, buffer: &mut Vec<u8>) {
    let family = match command {
      RipCommand::Request => FAMILY_UNSPECIFIED,
      RipCommand::Response => FAMILY_IP,
    };
    buffer.extend_from_slice(&family.to_be_bytes());
    buffer.extend_from_slice(&0u16.to_be_bytes());
    buffer.extend_from_slice(&self.address.octets());
    buffer.extend_from_slice(&self.mask.octets());
    buffer.extend_from_slice(&self.next_hop.octets());
    buffer.extend_from_slice(&self.metric.to_be_bytes());
  }
}

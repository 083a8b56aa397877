use anyhow::{anyhow, Error, Result};

/// UDP port reserved for RIP (RFC 2453 4.1)
pub const RIP_PORT: u16 = 520;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
  Test,
  Udp,
}

impl TryFrom<u8> for Protocol {
  type Error = Error;
  fn try_from(value: u8) -> Result<Protocol> {
    match value {
      0 => Ok(Protocol::Test),
      17 => Ok(Protocol::Udp),
      other => Err(anyhow!("Unrecognized protocol number {other}")),
    }
  }
}

impl Into<u8> for Protocol {
  fn into(self) -> u8 {
    match self {
      Protocol::Test => 0,
      Protocol::Udp => 17,
    }
  }
}

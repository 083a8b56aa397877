use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, UdpSocket};
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::interface::Interface;

/// Parsed lnx file: the first line names the local address and port all
/// links share, each following line one interface as
/// `remote_addr remote_port our_vip their_vip`.
#[derive(Debug)]
pub struct LnxConfig {
  /// UdpSocket to recv incoming frames on
  pub local_link: UdpSocket,

  pub interfaces: Vec<Interface>,
}

impl LnxConfig {
  pub fn new(lnx_filename: &str) -> Result<LnxConfig> {
    let f = File::open(lnx_filename)?;
    let reader = BufReader::new(f);
    let mut lines = reader.lines();

    let local_addr = lines
      .next()
      .ok_or_else(|| anyhow!("File {lnx_filename} is empty"))??;
    let tokens: Vec<&str> = local_addr.split_whitespace().collect();
    if tokens.len() != 2 {
      return Err(anyhow!(
        "File {lnx_filename} improperly formatted at line 1"
      ));
    }
    let local_link = UdpSocket::bind(format!("{}:{}", tokens[0], tokens[1]))?;

    let mut interfaces = Vec::new();
    for (i, line) in lines.enumerate() {
      let line = line?;
      let tokens: Vec<&str> = line.split_whitespace().collect();
      if tokens.is_empty() {
        continue;
      }
      if tokens.len() != 4 {
        return Err(anyhow!(
          "File {lnx_filename} improperly formatted at line {}",
          i + 2
        ));
      }
      interfaces.push(Interface::new(
        i,
        SocketAddr::from_str(&format!("{}:{}", tokens[0], tokens[1]))?,
        tokens[2].parse()?,
        tokens[3].parse()?,
      ));
    }

    Ok(LnxConfig {
      local_link,
      interfaces,
    })
  }
}

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use crate::InterfaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  UP,
  DOWN,
}

/// One point-to-point link: our virtual address, the neighbor's virtual
/// address, and the socket address frames to the neighbor are sent to.
#[derive(Debug, Clone, Copy)]
pub struct Interface {
  pub id: InterfaceId,
  pub outgoing_link: SocketAddr,
  pub our_ip: Ipv4Addr,
  pub their_ip: Ipv4Addr,
  state: State,
}

impl Interface {
  pub fn new(
    id: InterfaceId,
    outgoing_link: SocketAddr,
    our_ip: Ipv4Addr,
    their_ip: Ipv4Addr,
  ) -> Interface {
    Interface {
      id,
      outgoing_link,
      our_ip,
      their_ip,
      state: State::UP,
    }
  }

  /// Sets interface to UP state
  pub fn up(&mut self) {
    self.state = State::UP;
  }

  /// Sets interface to DOWN state
  pub fn down(&mut self) {
    self.state = State::DOWN;
  }

  pub fn is_up(&self) -> bool {
    self.state == State::UP
  }

  pub fn state(&self) -> State {
    self.state
  }
}

impl fmt::Display for Interface {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let state = if self.is_up() { "up" } else { "down" };
    write!(
      f,
      "{}\t{}\t{}\t{}\t{}",
      self.id, state, self.our_ip, self.their_ip, self.outgoing_link
    )
  }
}

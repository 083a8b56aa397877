use std::net::UdpSocket;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::thread;

use anyhow::{anyhow, Result};

use crate::interface::Interface;
use crate::lnx_config::LnxConfig;
use crate::{debug, edebug, InterfaceId};

const MAX_SIZE: usize = 65536;

/// Frames exchanged with the network layer: the interface a frame arrived
/// on, or should leave through, plus its bytes.
pub type LinkFrame = (InterfaceId, Vec<u8>);

/// Point-to-point links over UDP. One socket receives for every interface;
/// the arriving interface is identified by the sender's socket address.
pub struct LinkLayer {
  interfaces: Arc<RwLock<Vec<Interface>>>,
  local_link: Arc<UdpSocket>,
}

impl LinkLayer {
  pub fn new(config: LnxConfig) -> LinkLayer {
    LinkLayer {
      interfaces: Arc::new(RwLock::new(config.interfaces)),
      local_link: Arc::new(config.local_link),
    }
  }

  /// Spawns the send and recv threads and hands back the channel ends the
  /// network layer talks to.
  pub fn run(&self) -> (Sender<LinkFrame>, Receiver<LinkFrame>) {
    let (send_tx, send_rx) = channel();
    let (recv_tx, recv_rx) = channel();

    let socket = self.local_link.clone();
    let interfaces = self.interfaces.clone();
    thread::spawn(move || LinkLayer::send_thread(send_rx, socket, interfaces));

    let socket = self.local_link.clone();
    let interfaces = self.interfaces.clone();
    thread::spawn(move || LinkLayer::recv_thread(recv_tx, socket, interfaces));

    (send_tx, recv_rx)
  }

  /// Sets the specified interface up
  pub fn up(&self, interface_id: InterfaceId) -> Result<()> {
    let mut interfaces = self.interfaces.write().unwrap();
    interfaces
      .get_mut(interface_id)
      .ok_or_else(|| anyhow!("No interface with id {interface_id}"))?
      .up();
    Ok(())
  }

  /// Sets the specified interface down
  pub fn down(&self, interface_id: InterfaceId) -> Result<()> {
    let mut interfaces = self.interfaces.write().unwrap();
    interfaces
      .get_mut(interface_id)
      .ok_or_else(|| anyhow!("No interface with id {interface_id}"))?
      .down();
    Ok(())
  }

  pub fn get_interfaces(&self) -> RwLockReadGuard<'_, Vec<Interface>> {
    self.interfaces.read().unwrap()
  }

  fn send_thread(
    send_rx: Receiver<LinkFrame>,
    local_link: Arc<UdpSocket>,
    interfaces: Arc<RwLock<Vec<Interface>>>,
  ) {
    while let Ok((id, frame)) = send_rx.recv() {
      let destination = {
        let interfaces = interfaces.read().unwrap();
        match interfaces.get(id) {
          Some(interface) if interface.is_up() => Some(interface.outgoing_link),
          Some(_) => {
            debug!("interface {id} is down, dropping outgoing frame");
            None
          }
          None => {
            edebug!("unknown interface {id}, dropping outgoing frame");
            None
          }
        }
      };
      if let Some(destination) = destination {
        if let Err(e) = local_link.send_to(&frame, destination) {
          edebug!("send on interface {id} failed: {e}");
        }
      }
    }
    debug!("link send channel closed, exiting...");
  }

  fn recv_thread(
    recv_tx: Sender<LinkFrame>,
    local_link: Arc<UdpSocket>,
    interfaces: Arc<RwLock<Vec<Interface>>>,
  ) {
    let mut buf = vec![0u8; MAX_SIZE];
    loop {
      match local_link.recv_from(&mut buf) {
        Ok((bytes_read, src)) => {
          let arrival = {
            let interfaces = interfaces.read().unwrap();
            interfaces
              .iter()
              .find(|interface| interface.outgoing_link == src)
              .map(|interface| (interface.id, interface.is_up()))
          };
          match arrival {
            None => debug!("frame from unknown link {src}, dropping..."),
            Some((_, false)) => (),
            Some((id, true)) => {
              if recv_tx.send((id, buf[..bytes_read].to_vec())).is_err() {
                debug!("link recv channel closed, exiting...");
                return;
              }
            }
          }
        }
        Err(e) => {
          edebug!("recv on local link failed: {e}");
          return;
        }
      }
    }
  }
}

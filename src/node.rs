use std::collections::{HashMap, HashSet};
use std::io::stdin;
use std::net::Ipv4Addr;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::forwarding_table::{ForwardingTable, RouteEntry};
use crate::ip_packet;
use crate::link_layer::{LinkFrame, LinkLayer};
use crate::lnx_config::LnxConfig;
use crate::protocol::{Protocol, RIP_PORT};
use crate::rip_message::{RipCommand, RipMsg};
use crate::{debug, edebug, InterfaceId};

/// All-RIP-routers multicast group (RFC 2453 4.3)
const RIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);
/// Interval between unsolicited full-table responses
const RIP_UPDATE_INTERVAL: Duration = Duration::from_secs(5);
/// Directly connected networks are /24s of the interface address
const DIRECT_PREFIX_LEN: u8 = 24;
const TEST_TTL: u8 = 16;

pub struct Node {
  link_layer: LinkLayer,
  table: Arc<Mutex<ForwardingTable>>,
  link_send_tx: Sender<LinkFrame>,
}

impl Node {
  /// Brings the link layer up, seeds one direct route per interface, and
  /// starts the receive loop and the periodic RIP broadcast.
  pub fn new(config: LnxConfig) -> Node {
    let link_layer = LinkLayer::new(config);

    let mut table = ForwardingTable::new();
    let mut our_addrs = HashSet::new();
    let mut interface_addrs = HashMap::new();
    for interface in link_layer.get_interfaces().iter() {
      our_addrs.insert(interface.our_ip);
      interface_addrs.insert(interface.id, interface.our_ip);
      table.update(
        true,
        RouteEntry::direct(interface.our_ip, DIRECT_PREFIX_LEN, interface.id),
      );
    }
    let table = Arc::new(Mutex::new(table));

    let (link_send_tx, link_recv_rx) = link_layer.run();

    let recv_table = table.clone();
    let recv_send_tx = link_send_tx.clone();
    thread::spawn(move || {
      Node::recv_thread(link_recv_rx, recv_table, our_addrs, interface_addrs, recv_send_tx)
    });

    let broadcast_table = table.clone();
    let broadcast_send_tx = link_send_tx.clone();
    let broadcast_interfaces: Vec<(InterfaceId, Ipv4Addr)> = link_layer
      .get_interfaces()
      .iter()
      .map(|interface| (interface.id, interface.our_ip))
      .collect();
    thread::spawn(move || {
      Node::broadcast_thread(broadcast_table, broadcast_interfaces, broadcast_send_tx)
    });

    Node {
      link_layer,
      table,
      link_send_tx,
    }
  }

  fn recv_thread(
    link_recv_rx: Receiver<LinkFrame>,
    table: Arc<Mutex<ForwardingTable>>,
    our_addrs: HashSet<Ipv4Addr>,
    interface_addrs: HashMap<InterfaceId, Ipv4Addr>,
    link_send_tx: Sender<LinkFrame>,
  ) {
    while let Ok((recv_if, mut packet)) = link_recv_rx.recv() {
      if !ip_packet::validate_checksum(&packet) {
        debug!("invalid IP checksum, dropping...");
        continue;
      }

      let dst = ip_packet::destination_address(&packet);
      if our_addrs.contains(&dst) || dst == RIP_MULTICAST_ADDR {
        let our_ip = match interface_addrs.get(&recv_if) {
          Some(addr) => *addr,
          None => continue,
        };
        Node::handle_local(&packet, recv_if, our_ip, &table, &link_send_tx);
      } else {
        Node::forward_packet(&mut packet, &table, &link_send_tx);
      }
    }
    debug!("link layer closed, exiting node recv...");
  }

  /// Handles a packet addressed to this router: RIP over UDP port 520, or
  /// a test payload to print.
  fn handle_local(
    packet: &[u8],
    recv_if: InterfaceId,
    our_ip: Ipv4Addr,
    table: &Arc<Mutex<ForwardingTable>>,
    link_send_tx: &Sender<LinkFrame>,
  ) {
    match Protocol::try_from(ip_packet::protocol(packet)) {
      Ok(Protocol::Udp) => {
        if ip_packet::udp_destination_port(packet) != Some(RIP_PORT) {
          debug!("UDP packet not for the RIP port, dropping...");
          return;
        }
        let msg = match RipMsg::unpack(packet) {
          Ok(msg) => msg,
          Err(e) => {
            edebug!("malformed RIP message: {e}");
            return;
          }
        };
        match msg.command {
          RipCommand::Request => {
            // whole-table request: answer straight back to the asker
            let response = table.lock().unwrap().build_response(recv_if);
            let requester = ip_packet::source_address(packet);
            match ip_packet::build_rip_datagram(our_ip, requester, &response.pack()) {
              Ok(datagram) => {
                let _ = link_send_tx.send((recv_if, datagram));
              }
              Err(e) => edebug!("building RIP response: {e}"),
            }
          }
          RipCommand::Response => {
            let src_addr = ip_packet::source_address(packet);
            table.lock().unwrap().apply_response(src_addr, recv_if, &msg);
          }
        }
      }
      Ok(Protocol::Test) => {
        println!(
          "Received test packet from {}: {}",
          ip_packet::source_address(packet),
          String::from_utf8_lossy(ip_packet::payload(packet))
        );
      }
      Err(e) => debug!("{e}, dropping..."),
    }
  }

  /// Transit path: route lookup, in-place TTL/checksum rewrite, out the
  /// chosen interface. A next hop of zero means the destination itself is
  /// on the chosen link.
  fn forward_packet(
    packet: &mut [u8],
    table: &Arc<Mutex<ForwardingTable>>,
    link_send_tx: &Sender<LinkFrame>,
  ) {
    let dst = ip_packet::destination_address(packet);
    let (next_hop, out_if, _metric) = match table.lock().unwrap().query(dst) {
      Some(route) => route,
      None => {
        debug!("no route to {dst}, dropping...");
        return;
      }
    };
    let next_hop = if next_hop == Ipv4Addr::UNSPECIFIED {
      dst
    } else {
      next_hop
    };

    if !ip_packet::forward(packet) {
      debug!("checksum failed on rewrite, dropping...");
      return;
    }
    debug!("forwarding {dst} via {next_hop} on interface {out_if}");
    let _ = link_send_tx.send((out_if, packet.to_vec()));
  }

  /// Sends the full table out every interface once per update interval,
  /// split horizon applied per interface.
  fn broadcast_thread(
    table: Arc<Mutex<ForwardingTable>>,
    interfaces: Vec<(InterfaceId, Ipv4Addr)>,
    link_send_tx: Sender<LinkFrame>,
  ) {
    loop {
      thread::sleep(RIP_UPDATE_INTERVAL);
      for &(id, our_ip) in &interfaces {
        let response = table.lock().unwrap().build_response(id);
        match ip_packet::build_rip_datagram(our_ip, RIP_MULTICAST_ADDR, &response.pack()) {
          Ok(datagram) => {
            if link_send_tx.send((id, datagram)).is_err() {
              debug!("link layer closed, exiting rip broadcast...");
              return;
            }
          }
          Err(e) => edebug!("building periodic RIP response: {e}"),
        }
      }
    }
  }

  pub fn run(&mut self) -> Result<()> {
    loop {
      let mut buf = String::new();
      if stdin().read_line(&mut buf)? == 0 {
        break;
      }

      let tokens: Vec<String> = match shellwords::split(buf.trim()) {
        Ok(tokens) => tokens,
        Err(e) => {
          eprintln!("Error: {e}");
          continue;
        }
      };
      if tokens.is_empty() {
        continue;
      }

      match &*tokens[0] {
        "interfaces" | "li" => {
          for interface in self.link_layer.get_interfaces().iter() {
            println!("{interface}");
          }
        }

        "routes" | "lr" => {
          print!("{}", self.table.lock().unwrap());
        }

        "up" | "down" => {
          if tokens.len() != 2 {
            eprintln!(
              "Error: '{}' expected 1 argument received {}",
              tokens[0],
              tokens.len() - 1
            );
            continue;
          }
          let interface_id: InterfaceId = match tokens[1].parse() {
            Ok(num) => num,
            Err(_) => {
              eprintln!("Error: interface id must be positive int");
              continue;
            }
          };
          let res = if tokens[0] == "up" {
            self.link_layer.up(interface_id)
          } else {
            self.link_layer.down(interface_id)
          };
          if let Err(e) = res {
            eprintln!("Error: setting interface status failed: {e}");
          }
        }

        "send" => {
          if tokens.len() != 4 {
            eprintln!(
              "Error: '{}' expected 3 arguments received {}",
              tokens[0],
              tokens.len() - 1
            );
            continue;
          }
          if let Err(e) = self.send_test_packet(&tokens[1], &tokens[2], &tokens[3]) {
            eprintln!("Error: {e}");
          }
        }

        "q" => {
          break;
        }

        other => {
          eprintln!(
            concat!(
              "Unrecognized command {}, expected one of ",
              "[interfaces | li, routes | lr, q, down INT, ",
              "up INT, send VIP PROTO STRING]"
            ),
            other
          );
        }
      }
    }
    Ok(())
  }

  fn send_test_packet(&self, vip: &str, protocol: &str, data: &str) -> Result<()> {
    let their_ip: Ipv4Addr = vip
      .parse()
      .map_err(|_| anyhow!("Failed to parse vip"))?;
    let protocol = protocol
      .parse::<u8>()
      .map_err(|_| anyhow!("Failed to parse protocol, must be u8"))
      .and_then(Protocol::try_from)?;

    let (_next_hop, out_if, _metric) = self
      .table
      .lock()
      .unwrap()
      .query(their_ip)
      .ok_or_else(|| anyhow!("No route to {their_ip}"))?;
    let source = self
      .link_layer
      .get_interfaces()
      .get(out_if)
      .map(|interface| interface.our_ip)
      .ok_or_else(|| anyhow!("No interface with id {out_if}"))?;

    let packet = ip_packet::build_datagram(source, their_ip, protocol, TEST_TTL, data.as_bytes())?;
    self
      .link_send_tx
      .send((out_if, packet))
      .map_err(|_| anyhow!("link layer closed"))?;
    Ok(())
  }
}

use std::cmp;
use std::fmt;
use std::net::Ipv4Addr;

use crate::rip_message::{
  mask_from_prefix_len, prefix_len_from_mask, RipCommand, RipEntry, RipMsg, INFINITY_COST,
};
use crate::InterfaceId;

/// A routing table row. `prefix` carries only its top `prefix_len` bits;
/// a `next_hop` of 0.0.0.0 marks a directly connected network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
  pub prefix: Ipv4Addr,
  pub prefix_len: u8,
  pub if_index: InterfaceId,
  pub next_hop: Ipv4Addr,
  pub metric: u32,
}

impl RouteEntry {
  /// Route for a directly connected network
  pub fn direct(prefix: Ipv4Addr, prefix_len: u8, if_index: InterfaceId) -> RouteEntry {
    RouteEntry {
      prefix,
      prefix_len,
      if_index,
      next_hop: Ipv4Addr::UNSPECIFIED,
      metric: 0,
    }
  }

  fn matches(&self, addr: Ipv4Addr) -> bool {
    let mask = mask_from_prefix_len(self.prefix_len);
    u32::from(addr) & mask == u32::from(self.prefix)
  }
}

impl fmt::Display for RouteEntry {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(
      f,
      "{}/{}\t{}\t{}\t{}",
      self.prefix, self.prefix_len, self.next_hop, self.if_index, self.metric
    )
  }
}

#[derive(Debug, Default)]
pub struct ForwardingTable {
  routes: Vec<RouteEntry>,
}

impl ForwardingTable {
  pub fn new() -> ForwardingTable {
    ForwardingTable::default()
  }

  /// Removes any route with the same (prefix, prefix_len), then adds
  /// `entry` when `insert` is true. Deleting an absent key is a no-op.
  /// The prefix is masked down to `prefix_len` bits, so two spellings of
  /// one network can never coexist.
  pub fn update(&mut self, insert: bool, mut entry: RouteEntry) {
    debug_assert!(entry.prefix_len <= 32);
    let mask = mask_from_prefix_len(entry.prefix_len);
    entry.prefix = Ipv4Addr::from(u32::from(entry.prefix) & mask);
    self
      .routes
      .retain(|route| !(route.prefix == entry.prefix && route.prefix_len == entry.prefix_len));
    if insert {
      self.routes.push(entry);
    }
  }

  /// Longest-prefix match: among all routes covering `addr`, the one with
  /// the greatest prefix length wins. Returns its next hop, egress
  /// interface and metric.
  pub fn query(&self, addr: Ipv4Addr) -> Option<(Ipv4Addr, InterfaceId, u32)> {
    self
      .routes
      .iter()
      .filter(|route| route.matches(addr))
      .max_by_key(|route| route.prefix_len)
      .map(|route| (route.next_hop, route.if_index, route.metric))
  }

  fn find(&self, prefix: Ipv4Addr, prefix_len: u8) -> Option<&RouteEntry> {
    self
      .routes
      .iter()
      .find(|route| route.prefix == prefix && route.prefix_len == prefix_len)
  }

  pub fn routes(&self) -> &[RouteEntry] {
    &self.routes
  }

  /// Builds the response advertised out `egress`: every route except those
  /// held by `egress` itself (split horizon), hop count incremented.
  pub fn build_response(&self, egress: InterfaceId) -> RipMsg {
    let entries = self
      .routes
      .iter()
      .filter(|route| route.if_index != egress)
      .map(|route| RipEntry {
        address: route.prefix,
        mask: Ipv4Addr::from(mask_from_prefix_len(route.prefix_len)),
        next_hop: route.next_hop,
        metric: cmp::min(route.metric + 1, INFINITY_COST),
      })
      .collect();
    RipMsg {
      command: RipCommand::Response,
      entries,
    }
  }

  /// Reconciles a received response from `src_addr` on `recv_if` into the
  /// table: an infinity metric withdraws the advertised prefix, an unknown
  /// prefix is inserted, a known one is replaced only by a strictly lower
  /// metric.
  pub fn apply_response(&mut self, src_addr: Ipv4Addr, recv_if: InterfaceId, msg: &RipMsg) {
    for entry in &msg.entries {
      let mask = u32::from(entry.mask);
      let candidate = RouteEntry {
        prefix: Ipv4Addr::from(u32::from(entry.address) & mask),
        prefix_len: prefix_len_from_mask(mask),
        if_index: recv_if,
        next_hop: src_addr,
        metric: entry.metric,
      };

      if entry.metric >= INFINITY_COST {
        self.update(false, candidate);
        continue;
      }

      match self.find(candidate.prefix, candidate.prefix_len) {
        None => self.update(true, candidate),
        Some(existing) if candidate.metric < existing.metric => self.update(true, candidate),
        Some(_) => (),
      }
    }
  }
}

impl fmt::Display for ForwardingTable {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    for route in &self.routes {
      writeln!(f, "{route}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ntest::timeout;

  fn route(prefix: &str, prefix_len: u8, if_index: InterfaceId, metric: u32) -> RouteEntry {
    RouteEntry {
      prefix: prefix.parse().unwrap(),
      prefix_len,
      if_index,
      next_hop: Ipv4Addr::new(10, 9, 9, 9),
      metric,
    }
  }

  #[test]
  fn insert_replaces_duplicate_key() {
    let mut table = ForwardingTable::new();
    table.update(true, route("10.0.0.0", 24, 0, 3));
    table.update(true, route("10.0.0.0", 24, 1, 5));

    assert_eq!(table.routes().len(), 1);
    let (_, if_index, metric) = table.query(Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    assert_eq!(if_index, 1);
    assert_eq!(metric, 5);
  }

  #[test]
  fn delete_missing_key_is_noop() {
    let mut table = ForwardingTable::new();
    table.update(true, route("10.0.0.0", 24, 0, 3));
    table.update(false, route("10.0.1.0", 24, 0, 3));
    assert_eq!(table.routes().len(), 1);
  }

  #[test]
  fn prefix_is_masked_to_its_length() {
    let mut table = ForwardingTable::new();
    table.update(true, route("10.0.1.5", 24, 0, 3));
    assert_eq!(table.routes()[0].prefix, Ipv4Addr::new(10, 0, 1, 0));
  }

  #[test]
  #[timeout(1000)]
  fn longest_prefix_wins() {
    let mut table = ForwardingTable::new();
    let mut shorter = route("10.0.0.0", 16, 1, 2);
    shorter.next_hop = Ipv4Addr::new(10, 1, 1, 1);
    let mut longer = route("10.0.0.0", 24, 2, 7);
    longer.next_hop = Ipv4Addr::new(10, 2, 2, 2);
    table.update(true, shorter);
    table.update(true, longer);

    let (next_hop, if_index, metric) = table.query(Ipv4Addr::new(10, 0, 0, 5)).unwrap();
    assert_eq!(next_hop, Ipv4Addr::new(10, 2, 2, 2));
    assert_eq!(if_index, 2);
    assert_eq!(metric, 7);

    // outside the /24 but inside the /16
    let (next_hop, if_index, _) = table.query(Ipv4Addr::new(10, 0, 1, 5)).unwrap();
    assert_eq!(next_hop, Ipv4Addr::new(10, 1, 1, 1));
    assert_eq!(if_index, 1);
  }

  #[test]
  fn default_route_matches_everything() {
    let mut table = ForwardingTable::new();
    table.update(true, route("0.0.0.0", 0, 3, 1));
    assert!(table.query(Ipv4Addr::new(8, 8, 8, 8)).is_some());
    assert!(table.query(Ipv4Addr::new(255, 255, 255, 255)).is_some());
  }

  #[test]
  fn query_misses_when_nothing_covers() {
    let mut table = ForwardingTable::new();
    table.update(true, route("10.0.0.0", 24, 0, 1));
    assert!(table.query(Ipv4Addr::new(10, 0, 1, 1)).is_none());
  }

  #[test]
  fn response_applies_split_horizon_and_increments_metric() {
    let mut table = ForwardingTable::new();
    table.update(
      true,
      RouteEntry::direct(Ipv4Addr::new(10, 0, 0, 0), 24, 0),
    );
    table.update(true, route("10.0.1.0", 24, 1, 2));
    table.update(true, route("10.0.2.0", 24, 2, 15));

    let response = table.build_response(0);
    assert_eq!(response.command, RipCommand::Response);
    assert_eq!(response.entries.len(), 2);
    for entry in &response.entries {
      assert_ne!(entry.address, Ipv4Addr::new(10, 0, 0, 0));
    }

    let learned = response
      .entries
      .iter()
      .find(|e| e.address == Ipv4Addr::new(10, 0, 1, 0))
      .unwrap();
    assert_eq!(learned.metric, 3);
    assert_eq!(learned.mask, Ipv4Addr::new(255, 255, 255, 0));

    // a route one short of infinity advertises as unreachable
    let distant = response
      .entries
      .iter()
      .find(|e| e.address == Ipv4Addr::new(10, 0, 2, 0))
      .unwrap();
    assert_eq!(distant.metric, INFINITY_COST);
  }

  #[test]
  fn direct_route_advertises_metric_one() {
    let mut table = ForwardingTable::new();
    table.update(
      true,
      RouteEntry::direct(Ipv4Addr::new(10, 0, 0, 0), 24, 0),
    );
    let response = table.build_response(1);
    assert_eq!(response.entries.len(), 1);
    assert_eq!(response.entries[0].metric, 1);
    assert_eq!(response.entries[0].next_hop, Ipv4Addr::UNSPECIFIED);
  }

  fn advert(address: &str, mask: &str, metric: u32) -> RipMsg {
    RipMsg {
      command: RipCommand::Response,
      entries: vec![RipEntry {
        address: address.parse().unwrap(),
        mask: mask.parse().unwrap(),
        next_hop: Ipv4Addr::UNSPECIFIED,
        metric,
      }],
    }
  }

  #[test]
  #[timeout(1000)]
  fn reconciler_inserts_replaces_and_ignores() {
    let mut table = ForwardingTable::new();
    let first_peer = Ipv4Addr::new(10, 0, 2, 2);
    let second_peer = Ipv4Addr::new(10, 0, 3, 3);

    // unknown prefix: insert
    table.apply_response(first_peer, 1, &advert("10.0.5.0", "255.255.255.0", 3));
    let (next_hop, if_index, metric) = table.query(Ipv4Addr::new(10, 0, 5, 1)).unwrap();
    assert_eq!((next_hop, if_index, metric), (first_peer, 1, 3));

    // worse metric from elsewhere: no change
    table.apply_response(second_peer, 2, &advert("10.0.5.0", "255.255.255.0", 5));
    let (next_hop, if_index, metric) = table.query(Ipv4Addr::new(10, 0, 5, 1)).unwrap();
    assert_eq!((next_hop, if_index, metric), (first_peer, 1, 3));

    // equal metric: also no change
    table.apply_response(second_peer, 2, &advert("10.0.5.0", "255.255.255.0", 3));
    let (next_hop, _, _) = table.query(Ipv4Addr::new(10, 0, 5, 1)).unwrap();
    assert_eq!(next_hop, first_peer);

    // strictly better: replace
    table.apply_response(second_peer, 2, &advert("10.0.5.0", "255.255.255.0", 2));
    let (next_hop, if_index, metric) = table.query(Ipv4Addr::new(10, 0, 5, 1)).unwrap();
    assert_eq!((next_hop, if_index, metric), (second_peer, 2, 2));
  }

  #[test]
  fn reconciler_withdraws_on_infinity() {
    let mut table = ForwardingTable::new();
    let peer = Ipv4Addr::new(10, 0, 2, 2);

    table.apply_response(peer, 1, &advert("10.0.5.0", "255.255.255.0", 3));
    assert_eq!(table.routes().len(), 1);

    table.apply_response(peer, 1, &advert("10.0.5.0", "255.255.255.0", 16));
    assert!(table.routes().is_empty());

    // withdrawing an unknown prefix is a no-op
    table.apply_response(peer, 1, &advert("10.0.6.0", "255.255.255.0", 16));
    assert!(table.routes().is_empty());
  }

  #[test]
  fn reconciler_keys_on_exact_prefix() {
    let mut table = ForwardingTable::new();
    let peer = Ipv4Addr::new(10, 0, 2, 2);
    table.update(true, route("10.0.0.0", 16, 0, 1));

    // a /24 inside an existing /16 is a distinct destination
    table.apply_response(peer, 1, &advert("10.0.5.0", "255.255.255.0", 9));
    assert_eq!(table.routes().len(), 2);
  }

  #[test]
  fn learned_route_round_trip() {
    // seeded with a direct /24 on interface 0; a response on interface 1
    // from 10.0.2.2 advertises 10.0.1.0/24 at metric 1
    let mut table = ForwardingTable::new();
    table.update(
      true,
      RouteEntry::direct(Ipv4Addr::new(10, 0, 0, 1), 24, 0),
    );

    let peer = Ipv4Addr::new(10, 0, 2, 2);
    table.apply_response(peer, 1, &advert("10.0.1.0", "255.255.255.0", 1));

    let (next_hop, if_index, metric) = table.query(Ipv4Addr::new(10, 0, 1, 7)).unwrap();
    assert_eq!((next_hop, if_index, metric), (peer, 1, 1));

    // and it is advertised everywhere except back toward interface 1
    let back = table.build_response(1);
    assert!(back.entries.iter().all(|e| e.address != Ipv4Addr::new(10, 0, 1, 0)));
    let out = table.build_response(0);
    let advertised = out
      .entries
      .iter()
      .find(|e| e.address == Ipv4Addr::new(10, 0, 1, 0))
      .unwrap();
    assert_eq!(advertised.metric, 2);
  }
}

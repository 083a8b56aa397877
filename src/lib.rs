pub mod forwarding_table;
pub mod interface;
pub mod ip_packet;
pub mod link_layer;
pub mod lnx_config;
pub mod node;
pub mod protocol;
pub mod rip_message;
pub mod utils;

pub type InterfaceId = usize;

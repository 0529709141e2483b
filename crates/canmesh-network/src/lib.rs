//! # canmesh-network
//!
//! Virtual CAN networking for containers.
//!
//! A [`Network`] owns one vcan interface and the endpoints registered on
//! it. Attaching an endpoint links it to the network interface and to
//! every other registered endpoint through [`Gateway`] rules, so the
//! members of a network form a full mesh on the CAN bus.

#![warn(missing_docs)]

mod command;

pub mod cangw;
pub mod endpoint;
pub mod gateway;
pub mod link;
pub mod network;

pub use cangw::CanGwBackend;
pub use endpoint::{Endpoint, VxcanEndpoint};
pub use gateway::{Gateway, Rule, RuleBackend};
pub use link::{IpLinkManager, LinkGuard, LinkHandle, LinkKind, LinkManager};
pub use network::Network;

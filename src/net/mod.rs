//! Networking: framed connections, a peer-to-peer network and the
//! communication traits protocols are written against.

pub mod agency;
pub mod connection;
pub mod network;

/// Identifies one of the participating parties (a location).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[display(fmt = "P{}", _0)]
pub struct Id(pub usize);

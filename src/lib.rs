//! crossprobe - keep an EDA viewer in sync with table selections.
//!
//! Selections made in a sign-off report grid are turned into plaintext
//! `select` commands and sent over TCP to a schematic or waveform tool, either
//! by dialing the tool ([`client`]) or by letting the tool dial in
//! ([`server`]). [`interconnect::Interconnect`] ties the pieces together.

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod hier;
pub mod interconnect;
pub mod protocol;
pub mod scope;
pub mod server;
pub mod table;

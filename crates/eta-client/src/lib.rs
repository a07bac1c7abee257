//! ETA Client - REST access to ETA heating controllers
//!
//! Negotiates the API generation on connect and exposes typed reads,
//! writes and error polling on top of a pluggable [`Transport`].

pub mod client;
pub mod transport;
pub mod wire;

pub use client::{ClientConfig, ClientError, EtaClient};
pub use transport::{FixtureTransport, HttpTransport, Transport};

//! In-process event receivers.
//!
//! [`LocalTransport`] implements [`sinkproof_ports::TransportProvider`]:
//! every receiver binds a loopback port, optionally terminates TLS with a
//! freshly issued CA, and appends each request it sees to the event store.
//! Requests to a receiver that expects an audience but carry no bearer token
//! are recorded as rejected and answered `401`; everything else gets `202`.

pub mod client;
pub mod cloudevent;
pub mod server;
pub mod tls;
pub mod transport;

pub use client::{CloudEventSender, OutboundEvent};
pub use server::{ConnInfo, RunningReceiver};
pub use tls::TlsMaterial;
pub use transport::LocalTransport;

//! gRPC plumbing to the remote policy authority
//!
//! This module provides:
//! - Generated protobuf types and service stubs (`pb`)
//! - Transport establishment: plaintext, TLS, TLS without verification
//! - The `Authority` seam and its tonic-backed implementation

pub mod client;
pub mod transport;

pub mod pb {
    tonic::include_proto!("podsentinel.v1");
}

pub use client::{Authority, AuthorityError, GrpcAuthority};
pub use transport::{connect, TransportError};

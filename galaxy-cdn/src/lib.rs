//! HTTP access to the GOG Galaxy content system
//!
//! Wraps the six endpoint families behind typed operations: build listings,
//! V1/V2 manifests, secure links, patch queries and patch secure links.
//! Responses that arrive as zlib streams are inflated transparently before
//! JSON parsing; raw undecoded bytes stay available for archival mirrors.

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod secure_link;

pub use auth::{AnonymousTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{CdnClient, CdnClientBuilder};
pub use endpoints::CdnEndpoints;
pub use error::{Error, Result};
pub use secure_link::SecureLinkProvider;

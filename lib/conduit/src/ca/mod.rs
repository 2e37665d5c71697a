//! The certificate authority: an enrollment database, a small issuing
//! server and the client that requests signed certificates from it.

pub mod client;
pub mod database;
pub mod server;

/// Validity horizon granted with each issued certificate.
pub const CERT_VALIDITY_MS: i64 = 5 * 24 * 60 * 60 * 1000;

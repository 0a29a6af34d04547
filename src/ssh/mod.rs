//! SSH module - opens authenticated connections for SFTP sessions
//!
//! This module provides the connection layer using the russh library.
//!
//! # Features
//! - Password and private key authentication
//! - Optional host key pinning by SHA256 fingerprint
//! - Keepalive on every connection

mod client;
mod config;
mod error;

pub use client::{fingerprint, ClientHandler, SshClient};
pub use config::{AuthMethod, SshConfig};
pub use error::SshError;

//! Forge transport layer: credential minting and the typed REST client.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::CredentialBroker;
pub use client::{ForgeApi, ForgeClient};
pub use types::*;

//! Session lifecycle, message ingest, and media handling for the WhatsApp
//! bridge. The binary crate (`bridge`) wires this into an HTTP surface and a
//! process entry point; everything that talks to the WhatsApp protocol or the
//! local stores lives here.

pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod store;

pub use error::BridgeError;

//! Core of the Telegram REST façade: account sessions, QR login and the
//! operations the HTTP layer exposes.
//!
//! The wrapped MTProto library lives behind [`ports::TelegramClient`];
//! adapters are implemented in other crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod login;
pub mod media;
pub mod ports;
pub mod qr;
pub mod registry;
pub mod security;
pub mod service;
pub mod session_store;
pub mod stories;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};

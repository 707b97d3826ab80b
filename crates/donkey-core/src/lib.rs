//! Core domain + application logic for the Smart Donkey bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! messaging port; persistence lives behind the store port.

pub mod access;
pub mod config;
pub mod cooldown;
pub mod defaults;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod gate;
pub mod logging;
pub mod messaging;
pub mod store;
pub mod utils;

pub use errors::{Error, Result};

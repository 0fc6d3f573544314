//! Core relay pipeline for the channel post relay.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! outbound port (`messaging::port::SendPort`) and feeds inbound posts through
//! a plain channel, so the whole pipeline can be driven by test doubles.

pub mod classify;
pub mod compose;
pub mod config;
pub mod domain;
pub mod errors;
pub mod forwarder;
pub mod listener;
pub mod logging;
pub mod messaging;
pub mod numeral;
pub mod transform;

pub use errors::{Error, PlatformError, PlatformErrorKind, Result};

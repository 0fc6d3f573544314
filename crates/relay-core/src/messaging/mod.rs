//! Outbound messaging: the platform port and its decorators.

pub mod port;
pub mod throttled;

//! Metering service clients.

pub mod http;

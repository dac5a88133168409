//! Metering service wire types.

pub mod models;

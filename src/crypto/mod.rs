//! Cryptographic primitives: trust anchor, claim checks and token verification.

pub mod anchor;
pub mod claims;
pub mod verify;

//! # Meterwarden
//!
//! **Marketplace entitlement registration and verification for Rust.**
//!
//! Meterwarden proves, on every reconcile cycle, that a deployment is
//! entitled to run under a cloud marketplace's metering program. It
//! registers usage with the metering service **once** per entitlement
//! record, caches the signed confirmation it gets back, and re-verifies that
//! confirmation against an embedded RSA public key and the expected claims
//! (product code, per-cluster nonce, key version).
//!
//! ## Features
//!
//! - **Idempotent registration**: a cached token is never re-registered
//!   (the metering call may bill the customer)
//! - **Three-way verification**: authentic, not authentic, or authentic with
//!   the wrong claims, kept distinct
//! - **Optimistic-concurrency writes** with a bounded conflict retry policy
//! - **Per-cycle deadline** that cancels in-flight I/O
//!
//! ## Quickstart
//!
//! ```no_run
//! use meterwarden::{
//!     AwsMeteringClient, EntitlementConfig, FileStore, Reconcile, ReconcileRequest, Reconciler,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), meterwarden::MeterwardenError> {
//! let store = Arc::new(FileStore::new("meterwarden")?);
//! let metering = Arc::new(AwsMeteringClient::from_env().await?);
//! let reconciler = Reconciler::new(EntitlementConfig::marketplace(), store, metering)?;
//!
//! let outcome = reconciler
//!     .reconcile(&ReconcileRequest::new("upbound-system"))
//!     .await?;
//! if let Some(delay) = outcome.requeue_after() {
//!     println!("recheck in {:?}", delay);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Scheduling
//!
//! Meterwarden runs single cycles. Triggering them (watch notifications,
//! periodic resync) and backing off after errors is the host's job; see
//! [`Reconcile`] and [`Outcome::requeue_after`].

#![deny(missing_docs)]

// Core modules
pub mod config;
pub mod errors;
pub mod retry;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Client layer
pub mod client;

// Storage layer
pub mod store;

// Registration and reconcile
pub mod reconciler;
pub mod registrar;

// Re-exports for public API
pub use client::http::{AwsMeteringClient, MeteringClient};
pub use config::EntitlementConfig;
pub use crypto::anchor::TrustAnchor;
pub use crypto::claims::{Claim, ClaimMismatch};
pub use crypto::verify::{SignatureVerifier, Verification};
pub use errors::MeterwardenError;
pub use reconciler::{Outcome, Reconcile, ReconcileRequest, Reconciler};
pub use registrar::Registrar;
pub use retry::RetryPolicy;
pub use store::{EntitlementRecord, EntitlementStore, FileStore, MemoryStore, RecordKey};

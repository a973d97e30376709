//! Core types, ports, and client-side synchronisation for the SkillSwap
//! marketplace.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement [`remote::RemoteCollection`] and
//! [`marketplace::Marketplace`]; everything else (reconciliation, read state,
//! chat and notification facades) is written against those traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod chat;
pub mod collection;
pub mod error;
pub mod live;
pub mod marketplace;
pub mod memory;
pub mod notifications;
pub mod read_state;
pub mod record;
pub mod remote;
pub mod verification;

pub use error::{Error, Result};

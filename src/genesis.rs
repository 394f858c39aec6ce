//! Genesis document input.
//!
//! - [`document`] — the snapshot model (registry, staking, governance)
//! - [`signature`] — verify-and-decode for signed registry envelopes
//! - [`quantity`] / [`keys`] — arbitrary-precision amounts and public keys

pub mod document;
pub mod keys;
pub mod quantity;
pub mod signature;

#[cfg(test)]
pub(crate) mod fixtures;

pub use document::GenesisDocument;

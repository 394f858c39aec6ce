//! Target storage for indexed chain state.
//!
//! - [`client`] — pooled SQLite client with batched transactions
//! - [`checkpoint`] — shadow copies of height-dependent tables
//! - [`validation`] — comparison of checkpoints with a genesis document

pub mod checkpoint;
pub mod client;
pub mod validation;

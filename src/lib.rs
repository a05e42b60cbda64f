#![deny(missing_docs)]
//! # pokedex
//! A multi-client record service over two fixed-layout binary files: a
//! read-only catalog of *species* records and a mutable file of *trainer*
//! records where each trainer references up to six species by id.
//!
//! Clients connect over TCP, issue textual commands inside length-prefixed
//! frames, and receive JSON-encoded records or short status tokens. Access to
//! the trainer file is serialised per record id by the [`LockManager`], which
//! also gives whole-file scans a consistent view; the on-disk layouts live in
//! [`record`], the store operations in [`store`], and the server and client
//! halves in [`server`] and [`client`].

pub mod client;
pub mod command;
pub mod error;
pub mod frame;
pub mod locks;
pub mod logging;
pub mod record;
pub mod server;
pub mod store;

pub use client::PokedexClient;
pub use command::Request;
pub use error::{PokedexError, Result};
pub use locks::LockManager;
pub use logging::ServerLog;
pub use record::{SpeciesRecord, SpeciesSlot, TrainerRecord};
pub use server::PokedexServer;
pub use store::RecordStore;

//! `msgarchive` — extract conversations from Messages `.ichat` archives.
//!
//! This crate decodes keyed-archive chat logs into [`model::message::Message`]
//! records, resolves their attachments on disk (copying and deduplicating
//! files found in an external library), and groups the messages by year for
//! a renderer.

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod index;
pub mod model;
pub mod parser;
pub mod store;

//! Keyed-archive decoding: object pool, archived collections, participants,
//! and `.ichat` message extraction.

pub mod archived_map;
pub mod ichat;
pub mod participant;
pub mod value;

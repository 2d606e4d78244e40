//! Core data model types for conversation messages, participants, and attachments.

pub mod attachment;
pub mod message;
pub mod participant;

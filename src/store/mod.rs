//! Attachment storage: lookup under the Messages attachments tree and
//! deduplicated import from an external library.

pub mod attachment;

//! Extracted conversation messages.

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Local, Utc};

use super::attachment::Attachment;
use super::participant::Participant;

/// Object replacement character marking where an attachment sits in the text.
pub const ATTACHMENT_PLACEHOLDER: char = '\u{FFFC}';

/// One message extracted from an `.ichat` archive.
///
/// Immutable once produced by the extractor; ownership passes to the
/// per-year collection built by the walker.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Archive file the message was decoded from.
    pub source_file: PathBuf,

    /// Sender of the message.
    pub sender: Participant,

    /// The `Subject` presentity, when the archive records one.
    pub thread_subject: Option<Participant>,

    /// Thread identity shown to the reader (sender or subject, by policy).
    pub who: Participant,

    /// Message GUID (empty for legacy records without one).
    pub guid: String,

    /// Absolute timestamp.
    pub date: DateTime<Utc>,

    /// Flat text; each [`ATTACHMENT_PLACEHOLDER`] pairs with one entry of `attachments`.
    pub text: String,

    /// Attachments in placeholder order.
    pub attachments: Vec<Attachment>,

    /// Service name from the archive root (e.g. `"iMessage"`, `"SMS"`).
    pub service: String,

    /// `true` only for the first message of its archive file (thread boundary).
    pub is_first_in_file: bool,
}

impl Message {
    /// Calendar year of the timestamp in UTC.
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Calendar year of the timestamp in the local time zone.
    pub fn local_year(&self) -> i32 {
        self.date.with_timezone(&Local).year()
    }

    /// Whether the sender is the archive owner.
    pub fn is_from_me(&self) -> bool {
        self.sender.is_self
    }

    /// Split the text at placeholders, pairing each preceding segment with its attachment.
    ///
    /// The final segment (after the last placeholder) is returned with `None`.
    pub fn segments(&self) -> Vec<(&str, Option<&Attachment>)> {
        let mut out = Vec::with_capacity(self.attachments.len() + 1);
        let mut atts = self.attachments.iter();
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find(ATTACHMENT_PLACEHOLDER) {
            out.push((&rest[..pos], atts.next()));
            rest = &rest[pos + ATTACHMENT_PLACEHOLDER.len_utf8()..];
        }
        out.push((rest, None));
        out
    }
}

/// Count the attachment placeholders in `text`.
pub fn placeholder_count(text: &str) -> usize {
    text.chars().filter(|&c| c == ATTACHMENT_PLACEHOLDER).count()
}

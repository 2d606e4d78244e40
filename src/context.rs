//! Run-scoped extraction context.
//!
//! Everything that outlives a single archive file lives here and is threaded
//! through the extractor by reference: identity policies, the handle-name
//! lookup table, and the attachment resolver with its copy cache.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::store::attachment::AttachmentResolver;

/// How a participant is recognized as the archive owner.
///
/// The first identity listed in a file's metadata is recorded as "self".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfMatch {
    /// The identity must equal the recorded self identity.
    #[default]
    Exact,
    /// The identity must start with the recorded self identity.
    Prefix,
}

impl SelfMatch {
    /// Parse a config value (`"exact"` or `"prefix"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "prefix" => Some(Self::Prefix),
            _ => None,
        }
    }

    /// Whether `id` identifies the owner recorded as `self_id`.
    pub fn matches(self, id: &str, self_id: &str) -> bool {
        if self_id.is_empty() {
            return false;
        }
        match self {
            Self::Exact => id == self_id,
            Self::Prefix => id.starts_with(self_id),
        }
    }
}

/// Which participant a message's thread identity ("who") is taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadIdentity {
    /// Use the `Subject` presentity when the sender's identity starts with
    /// this relay prefix; otherwise the sender.
    RelayPrefix(String),
    /// Use the `Subject` presentity whenever one is recorded.
    SubjectWhenPresent,
}

impl Default for ThreadIdentity {
    fn default() -> Self {
        Self::RelayPrefix(DEFAULT_RELAY_PREFIX.to_string())
    }
}

/// Sender prefix marking an email-style relay.
pub const DEFAULT_RELAY_PREFIX: &str = "e:";

impl ThreadIdentity {
    /// Parse a config value (`"relay-prefix"` or `"subject-when-present"`).
    pub fn from_name(name: &str, relay_prefix: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "relay-prefix" => Some(Self::RelayPrefix(relay_prefix.to_string())),
            "subject-when-present" => Some(Self::SubjectWhenPresent),
            _ => None,
        }
    }

    /// Whether the subject should stand in for a sender with identity `sender_id`.
    pub fn use_subject(&self, sender_id: &str) -> bool {
        match self {
            Self::RelayPrefix(prefix) => !prefix.is_empty() && sender_id.starts_with(prefix.as_str()),
            Self::SubjectWhenPresent => true,
        }
    }
}

/// Positions of the participant lists inside the metadata record's `NS.objects`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataSlots {
    pub names: usize,
    pub ids: usize,
}

impl Default for MetadataSlots {
    fn default() -> Self {
        Self { names: 3, ids: 4 }
    }
}

/// Options that shape how messages are extracted.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub self_match: SelfMatch,
    pub thread_identity: ThreadIdentity,
    pub metadata_slots: MetadataSlots,
    /// Fallback display names keyed by normalized identity.
    pub handle_names: HashMap<String, String>,
}

/// Load a JSON object mapping identities to display names.
///
/// Keys are normalized the same way presentity identities are (leading `+`
/// stripped). A missing file yields an empty table.
pub fn load_handle_names(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "No handle-name file");
        return Ok(HashMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    let raw: HashMap<String, String> = serde_json::from_str(&contents)?;
    let names: HashMap<String, String> = raw
        .into_iter()
        .map(|(id, name)| (crate::model::participant::Participant::normalize_id(&id), name))
        .collect();
    if names.is_empty() {
        warn!(path = %path.display(), "Handle-name file is empty");
    }
    Ok(names)
}

/// State shared by every file of one run.
///
/// Owned by the orchestrator and passed by `&mut` into each extraction. The
/// attachment copy cache inside the resolver is the only shared mutable state.
#[derive(Debug)]
pub struct RunContext {
    pub options: ExtractOptions,
    pub attachments: AttachmentResolver,
}

impl RunContext {
    pub fn new(options: ExtractOptions, attachments: AttachmentResolver) -> Self {
        Self {
            options,
            attachments,
        }
    }
}

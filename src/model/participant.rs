//! Conversation participants.

/// A resolved conversation participant.
///
/// # Examples
/// - presentity `"+15551234567"` listed as `"Alice"` → `id = "15551234567"`, `name = "Alice"`
/// - presentity `"bob@example.com"` with no listed name → `name = "bob@example.com"`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Participant {
    /// Phone number or email-like identity, leading `+` stripped.
    pub id: String,
    /// Display name; falls back to `id` when no name is known.
    pub name: String,
    /// `true` if this participant is the archive owner.
    pub is_self: bool,
}

impl Participant {
    /// Strip the leading `+` characters from a raw presentity identity.
    pub fn normalize_id(raw: &str) -> String {
        raw.trim().trim_start_matches('+').to_string()
    }

    /// Format for display: `"Name <id>"`, or just `"id"` when the name is the id.
    pub fn display(&self) -> String {
        if self.name.is_empty() || self.name == self.id {
            self.id.clone()
        } else {
            format!("{} <{}>", self.name, self.id)
        }
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

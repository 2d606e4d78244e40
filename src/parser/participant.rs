//! Presentity resolution.
//!
//! Each archive file lists its participants in its metadata record as two
//! parallel arrays (display names and identities) at fixed positions of the
//! metadata's `NS.objects`. The first identity listed is the archive owner.

use std::collections::HashMap;

use tracing::debug;

use crate::context::{ExtractOptions, MetadataSlots};
use crate::error::FormatError;
use crate::model::participant::Participant;

use super::archived_map::{archived_list, archived_slot};
use super::value::{ObjectPool, Uid, Value};

/// Field of a presentity record holding its identity.
const PRESENTITY_ID_FIELD: &str = "ID";

/// Per-file identity → display-name table built from the metadata record.
#[derive(Debug, Clone, Default)]
pub struct ParticipantTable {
    names: HashMap<String, String>,
    self_id: Option<String>,
}

impl ParticipantTable {
    /// Read the name and identity lists from the metadata record.
    pub fn from_metadata(
        metadata: &Value,
        pool: &ObjectPool,
        slots: MetadataSlots,
    ) -> Result<Self, FormatError> {
        let names = string_list(metadata, pool, "metadata participant names", slots.names)?;
        let ids = string_list(metadata, pool, "metadata participant ids", slots.ids)?;
        if names.len() != ids.len() {
            debug!(
                names = names.len(),
                ids = ids.len(),
                "Participant name and identity lists differ in length"
            );
        }
        Ok(Self::from_lists(&names, &ids))
    }

    /// Build from parallel name and identity lists, paired by position.
    ///
    /// `None` entries keep their slot: a `None` identity is skipped and a
    /// `None` (or blank) name leaves its identity unnamed.
    pub fn from_lists(names: &[Option<&str>], ids: &[Option<&str>]) -> Self {
        let mut table = Self::default();
        for (i, raw_id) in ids.iter().enumerate() {
            let Some(raw_id) = raw_id else {
                continue;
            };
            let id = Participant::normalize_id(raw_id);
            if table.self_id.is_none() {
                table.self_id = Some(id.clone());
            }
            let name = names
                .get(i)
                .copied()
                .flatten()
                .map(str::trim)
                .filter(|n| !n.is_empty());
            if let Some(name) = name {
                table.names.entry(id).or_insert_with(|| name.to_string());
            }
        }
        table
    }

    /// The identity recorded as the archive owner, if any was listed.
    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    /// Display name listed for `id` in this file.
    pub fn name_for(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Resolves presentity references of one file, memoizing per back-reference.
///
/// Created fresh for every archive file; identities are not stable across files.
#[derive(Debug, Default)]
pub struct ParticipantResolver {
    table: ParticipantTable,
    cache: HashMap<Uid, Participant>,
}

impl ParticipantResolver {
    pub fn new(table: ParticipantTable) -> Self {
        Self {
            table,
            cache: HashMap::new(),
        }
    }

    pub fn table(&self) -> &ParticipantTable {
        &self.table
    }

    /// Resolve the presentity referenced by `reference` (usually a UID).
    pub fn resolve(
        &mut self,
        reference: &Value,
        pool: &ObjectPool,
        options: &ExtractOptions,
    ) -> Result<Participant, FormatError> {
        let uid = reference.as_uid();
        if let Some(hit) = uid.and_then(|u| self.cache.get(&u)) {
            return Ok(hit.clone());
        }

        let presentity = pool
            .follow(reference)?
            .ok_or_else(|| FormatError::missing("presentity"))?;
        let raw_id = match presentity {
            Value::Record(_) => pool
                .string_field(presentity, PRESENTITY_ID_FIELD)
                .ok_or_else(|| FormatError::missing(PRESENTITY_ID_FIELD))?,
            Value::String(s) => s.as_str(),
            other => {
                return Err(FormatError::unexpected(
                    format!("presentity ({})", other.kind()),
                    "a record",
                ))
            }
        };

        let participant = self.participant_for(raw_id, options);
        if let Some(u) = uid {
            self.cache.insert(u, participant.clone());
        }
        Ok(participant)
    }

    /// Build a participant for a raw identity using this file's table.
    pub fn participant_for(&self, raw_id: &str, options: &ExtractOptions) -> Participant {
        let id = Participant::normalize_id(raw_id);
        let name = self
            .table
            .name_for(&id)
            .or_else(|| options.handle_names.get(&id).map(String::as_str))
            .unwrap_or(&id)
            .to_string();
        let is_self = self
            .table
            .self_id()
            .is_some_and(|self_id| options.self_match.matches(&id, self_id));
        Participant { id, name, is_self }
    }

    /// Number of memoized presentities.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

fn string_list<'a>(
    metadata: &'a Value,
    pool: &'a ObjectPool,
    field: &str,
    slot: usize,
) -> Result<Vec<Option<&'a str>>, FormatError> {
    let list = archived_slot(metadata, pool, field, slot)?;
    if list.is_null() {
        return Ok(Vec::new());
    }
    Ok(archived_list(list, pool)?
        .into_iter()
        .map(|v| pool.string(v))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SelfMatch;

    fn uids(ids: &[u64]) -> Value {
        Value::Array(ids.iter().map(|&i| Value::Uid(Uid(i))).collect())
    }

    fn list(ids: &[u64]) -> Value {
        Value::Record(vec![("NS.objects".to_string(), uids(ids))])
    }

    fn presentity(id_uid: u64) -> Value {
        Value::Record(vec![(PRESENTITY_ID_FIELD.to_string(), Value::Uid(Uid(id_uid)))])
    }

    /// Pool with a metadata record (index 1) whose slots 3/4 hold names/ids.
    fn pool() -> ObjectPool {
        ObjectPool::new(vec![
            Value::Null,                                                    // 0
            list(&[0, 0, 0, 2, 3]),                                         // 1 metadata
            list(&[4, 5]),                                                  // 2 names
            list(&[6, 7]),                                                  // 3 ids
            Value::String("Me".into()),                                     // 4
            Value::String("Alice".into()),                                  // 5
            Value::String("+15550001111".into()),                           // 6
            Value::String("+15552223333".into()),                           // 7
            presentity(7),                                                  // 8
            presentity(10),                                                 // 9
            Value::Record(vec![("NS.string".into(), Value::String("+155500011119".into()))]), // 10
            presentity(12),                                                 // 11
            Value::String("bob@example.com".into()),                        // 12
        ])
    }

    fn resolver(p: &ObjectPool) -> ParticipantResolver {
        let metadata = p.resolve(Uid(1)).unwrap();
        let table = ParticipantTable::from_metadata(metadata, p, MetadataSlots::default()).unwrap();
        ParticipantResolver::new(table)
    }

    #[test]
    fn test_table_from_metadata() {
        let p = pool();
        let r = resolver(&p);
        assert_eq!(r.table().self_id(), Some("15550001111"));
        assert_eq!(r.table().name_for("15552223333"), Some("Alice"));
        assert_eq!(r.table().len(), 2);
    }

    #[test]
    fn test_null_name_keeps_positions() {
        // names [$null, "Alice"], ids ["+1000", "+2000"]
        let p = ObjectPool::new(vec![
            Value::Null,
            list(&[0, 0, 0, 2, 3]),
            list(&[0, 4]),
            list(&[5, 6]),
            Value::String("Alice".into()),
            Value::String("+1000".into()),
            Value::String("+2000".into()),
        ]);
        let metadata = p.resolve(Uid(1)).unwrap();
        let table = ParticipantTable::from_metadata(metadata, &p, MetadataSlots::default()).unwrap();
        assert_eq!(table.self_id(), Some("1000"));
        assert_eq!(table.name_for("1000"), None);
        assert_eq!(table.name_for("2000"), Some("Alice"));
    }

    #[test]
    fn test_null_identity_keeps_positions() {
        // names ["Ghost", "Me", "Alice"], ids [$null, "+1000", "+2000"]
        let p = ObjectPool::new(vec![
            Value::Null,
            list(&[0, 0, 0, 2, 3]),
            list(&[4, 5, 6]),
            list(&[0, 7, 8]),
            Value::String("Ghost".into()),
            Value::String("Me".into()),
            Value::String("Alice".into()),
            Value::String("+1000".into()),
            Value::String("+2000".into()),
        ]);
        let metadata = p.resolve(Uid(1)).unwrap();
        let table = ParticipantTable::from_metadata(metadata, &p, MetadataSlots::default()).unwrap();
        assert_eq!(table.self_id(), Some("1000"));
        assert_eq!(table.name_for("1000"), Some("Me"));
        assert_eq!(table.name_for("2000"), Some("Alice"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_first_identity_is_self() {
        let table = ParticipantTable::from_lists(&[Some("Me"), Some("Bob")], &[Some("+1"), Some("+2")]);
        assert_eq!(table.self_id(), Some("1"));
    }

    #[test]
    fn test_missing_name_falls_back_to_id() {
        let table = ParticipantTable::from_lists(&[Some("Me")], &[Some("me"), Some("other")]);
        let r = ParticipantResolver::new(table);
        let p = r.participant_for("other", &ExtractOptions::default());
        assert_eq!(p.name, "other");
        assert!(!p.is_self);
    }

    #[test]
    fn test_handle_names_fill_in() {
        let r = ParticipantResolver::new(ParticipantTable::from_lists(&[], &[Some("me")]));
        let mut options = ExtractOptions::default();
        options
            .handle_names
            .insert("bob@example.com".into(), "Bob".into());
        assert_eq!(r.participant_for("bob@example.com", &options).name, "Bob");
    }

    #[test]
    fn test_resolve_and_cache() {
        let p = pool();
        let mut r = resolver(&p);
        let opts = ExtractOptions::default();
        let alice = r.resolve(&Value::Uid(Uid(8)), &p, &opts).unwrap();
        assert_eq!(alice.id, "15552223333");
        assert_eq!(alice.name, "Alice");
        assert!(!alice.is_self);
        r.resolve(&Value::Uid(Uid(8)), &p, &opts).unwrap();
        assert_eq!(r.cached(), 1);

        let bob = r.resolve(&Value::Uid(Uid(11)), &p, &opts).unwrap();
        assert_eq!(bob.name, "bob@example.com");
    }

    #[test]
    fn test_wrapped_identity_and_self_policies() {
        let p = pool();
        // Identity "+155500011119" extends the self id "15550001111".
        let mut exact = resolver(&p);
        let opts = ExtractOptions::default();
        let who = exact.resolve(&Value::Uid(Uid(9)), &p, &opts).unwrap();
        assert_eq!(who.id, "155500011119");
        assert!(!who.is_self);

        let mut prefix = resolver(&p);
        let opts = ExtractOptions {
            self_match: SelfMatch::Prefix,
            ..ExtractOptions::default()
        };
        assert!(prefix.resolve(&Value::Uid(Uid(9)), &p, &opts).unwrap().is_self);
    }

    #[test]
    fn test_null_reference_fails() {
        let p = pool();
        let mut r = resolver(&p);
        assert_eq!(
            r.resolve(&Value::Uid(Uid(0)), &p, &ExtractOptions::default())
                .unwrap_err(),
            FormatError::missing("presentity")
        );
        assert!(matches!(
            r.resolve(&Value::Uid(Uid(99)), &p, &ExtractOptions::default())
                .unwrap_err(),
            FormatError::UidOutOfRange { .. }
        ));
    }
}

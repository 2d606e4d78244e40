//! Dictionary and array records of a keyed archive.
//!
//! `NSDictionary` records carry two parallel UID arrays, `NS.keys` and
//! `NS.objects`; `NSArray` records carry only `NS.objects`. Both are resolved
//! through the object pool into ordinary Rust collections of borrowed values.

use crate::error::FormatError;

use super::value::{ObjectPool, Value};

const KEYS_FIELD: &str = "NS.keys";
const OBJECTS_FIELD: &str = "NS.objects";

/// Key/value view over an archived dictionary record, in archive order.
#[derive(Debug, Clone)]
pub struct ArchivedMap<'a> {
    entries: Vec<(&'a str, &'a Value)>,
}

impl<'a> ArchivedMap<'a> {
    /// Resolve the `NS.keys` / `NS.objects` arrays of `record` and zip them.
    ///
    /// Keys must resolve to strings. Values resolving to `$null` are kept as
    /// [`Value::Null`] so that positions stay aligned.
    pub fn build(record: &'a Value, pool: &'a ObjectPool) -> Result<Self, FormatError> {
        let keys = uid_array(record, KEYS_FIELD)?;
        let values = uid_array(record, OBJECTS_FIELD)?;
        if keys.len() != values.len() {
            return Err(FormatError::MapLengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }

        let mut entries = Vec::with_capacity(keys.len());
        for (k, v) in keys.iter().zip(values) {
            let key = match pool.follow(k)? {
                Some(Value::String(s)) => s.as_str(),
                Some(other) => {
                    return Err(FormatError::unexpected(
                        format!("{KEYS_FIELD} entry ({})", other.kind()),
                        "a string",
                    ))
                }
                None => return Err(FormatError::missing(KEYS_FIELD)),
            };
            let value = pool.follow(v)?.unwrap_or(&Value::Null);
            entries.push((key, value));
        }
        Ok(Self { entries })
    }

    /// Exact-string key lookup. `$null` values count as absent.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .filter(|v| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in archive order.
    pub fn keys(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }
}

/// Whether `record` has the shape of an archived dictionary.
pub fn is_archived_map(record: &Value) -> bool {
    record.field(KEYS_FIELD).is_some() && record.field(OBJECTS_FIELD).is_some()
}

/// Resolve every element of an archived array record's `NS.objects`.
///
/// `$null` elements are kept as [`Value::Null`].
pub fn archived_list<'a>(
    record: &'a Value,
    pool: &'a ObjectPool,
) -> Result<Vec<&'a Value>, FormatError> {
    uid_array(record, OBJECTS_FIELD)?
        .iter()
        .map(|v| pool.follow(v).map(|r| r.unwrap_or(&Value::Null)))
        .collect()
}

/// Resolve one element of an archived array, failing if the slot does not exist.
pub fn archived_slot<'a>(
    record: &'a Value,
    pool: &'a ObjectPool,
    field: &str,
    slot: usize,
) -> Result<&'a Value, FormatError> {
    let items = uid_array(record, OBJECTS_FIELD)?;
    let item = items.get(slot).ok_or_else(|| FormatError::MissingSlot {
        field: field.to_string(),
        slot,
        len: items.len(),
    })?;
    Ok(pool.follow(item)?.unwrap_or(&Value::Null))
}

fn uid_array<'a>(record: &'a Value, field: &str) -> Result<&'a [Value], FormatError> {
    match record.field(field) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(FormatError::unexpected(field, "an array")),
        None => Err(FormatError::missing(field)),
    }
}

//! Keyed-archive object graph: decoded values, back-references, and the object pool.
//!
//! A keyed archive stores every object in one flat `$objects` array and links
//! them with integer UIDs. The property-list decoding itself is done by the
//! `plist` crate; this module turns its tree into a [`KeyedArchive`] whose
//! values can be followed through the pool.

use std::path::Path;

use tracing::debug;

use crate::error::{ArchiveError, FormatError, Result};

/// Sentinel string stored at pool index 0 to stand for `nil`.
const NULL_SENTINEL: &str = "$null";

/// Key under which XML property lists spell a UID (`<dict><key>CF$UID</key>…`).
const XML_UID_KEY: &str = "CF$UID";

/// Expected value of the top-level `$archiver` field.
const KEYED_ARCHIVER: &str = "NSKeyedArchiver";

/// A back-reference into the object pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u64);

impl Uid {
    /// Index into the pool.
    pub fn index(self) -> u64 {
        self.0
    }
}

/// A decoded value from the object pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The `$null` sentinel.
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Data(Vec<u8>),
    Date(std::time::SystemTime),
    Array(Vec<Value>),
    /// Key/value record in declaration order.
    Record(Vec<(String, Value)>),
    Uid(Uid),
}

impl Value {
    /// Look up a field of a record by exact name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_uid(&self) -> Option<Uid> {
        match self {
            Value::Uid(uid) => Some(*uid),
            _ => None,
        }
    }

    /// Numeric value as `f64` (integers are widened).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::String(_) => "string",
            Value::Data(_) => "data",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Uid(_) => "uid",
        }
    }
}

impl From<plist::Value> for Value {
    fn from(value: plist::Value) -> Self {
        match value {
            plist::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            plist::Value::Dictionary(dict) => {
                // XML archives spell a UID as a one-entry dictionary.
                if dict.len() == 1 {
                    if let Some(index) = dict
                        .get(XML_UID_KEY)
                        .and_then(|v| v.as_unsigned_integer())
                    {
                        return Value::Uid(Uid(index));
                    }
                }
                Value::Record(
                    dict.into_iter()
                        .map(|(k, v)| (k, Value::from(v)))
                        .collect(),
                )
            }
            plist::Value::Boolean(b) => Value::Bool(b),
            plist::Value::Data(bytes) => Value::Data(bytes),
            plist::Value::Date(date) => Value::Date(date.into()),
            plist::Value::Real(r) => Value::Real(r),
            plist::Value::Integer(i) => match i.as_signed() {
                Some(n) => Value::Integer(n),
                None => Value::Real(i.as_unsigned().unwrap_or_default() as f64),
            },
            plist::Value::String(s) if s == NULL_SENTINEL => Value::Null,
            plist::Value::String(s) => Value::String(s),
            plist::Value::Uid(uid) => Value::Uid(Uid(uid.get())),
            _ => Value::Null,
        }
    }
}

/// The flat, 0-indexed object pool of one archive.
#[derive(Debug, Clone, Default)]
pub struct ObjectPool {
    objects: Vec<Value>,
}

impl ObjectPool {
    pub fn new(objects: Vec<Value>) -> Self {
        Self { objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Resolve a back-reference. Out-of-range indices yield `None`.
    pub fn resolve(&self, uid: Uid) -> Option<&Value> {
        usize::try_from(uid.0)
            .ok()
            .and_then(|i| self.objects.get(i))
    }

    /// Resolve a back-reference that must exist.
    pub fn require(&self, uid: Uid) -> std::result::Result<&Value, FormatError> {
        self.resolve(uid).ok_or(FormatError::UidOutOfRange {
            index: uid.0,
            len: self.objects.len(),
        })
    }

    /// Dereference `value` if it is a UID, pass it through otherwise.
    ///
    /// Returns `None` for `$null`, whether inline or referenced.
    pub fn follow<'a>(
        &'a self,
        value: &'a Value,
    ) -> std::result::Result<Option<&'a Value>, FormatError> {
        let target = match value {
            Value::Uid(uid) => self.require(*uid)?,
            other => other,
        };
        Ok(if target.is_null() { None } else { Some(target) })
    }

    /// Follow a record field; absent fields and `$null` both yield `None`.
    pub fn field<'a>(
        &'a self,
        record: &'a Value,
        name: &str,
    ) -> std::result::Result<Option<&'a Value>, FormatError> {
        match record.field(name) {
            Some(v) => self.follow(v),
            None => Ok(None),
        }
    }

    /// Follow a record field that must be present.
    pub fn required_field<'a>(
        &'a self,
        record: &'a Value,
        name: &str,
    ) -> std::result::Result<&'a Value, FormatError> {
        self.field(record, name)?
            .ok_or_else(|| FormatError::missing(name))
    }

    /// Interpret `value` as a string, unwrapping one `NS.string` record if needed.
    pub fn string<'a>(&'a self, value: &'a Value) -> Option<&'a str> {
        let target = self.follow(value).ok()??;
        match target {
            Value::String(s) => Some(s),
            Value::Record(_) => match self.follow(target.field("NS.string")?).ok()?? {
                Value::String(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Follow a field and read it as a string (see [`ObjectPool::string`]).
    pub fn string_field<'a>(&'a self, record: &'a Value, name: &str) -> Option<&'a str> {
        record.field(name).and_then(|v| self.string(v))
    }

    /// Class name of a record, via its `$class` → `$classname` chain.
    pub fn class_name<'a>(&'a self, record: &'a Value) -> Option<&'a str> {
        let class = self.field(record, "$class").ok()??;
        self.string_field(class, "$classname")
    }
}

/// A decoded keyed archive: the `$top` record plus the object pool.
#[derive(Debug, Clone)]
pub struct KeyedArchive {
    top: Value,
    pool: ObjectPool,
}

impl KeyedArchive {
    /// Decode the archive at `path` with the property-list reader.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ArchiveError::FileNotFound(path.to_path_buf()));
        }
        let raw = plist::Value::from_file(path).map_err(|e| ArchiveError::Plist {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_plist(raw).map_err(|e| ArchiveError::format(path, e))
    }

    /// Build from an already decoded property-list tree.
    pub fn from_plist(raw: plist::Value) -> std::result::Result<Self, FormatError> {
        let plist::Value::Dictionary(mut dict) = raw else {
            return Err(FormatError::NotKeyedArchive(
                "top level is not a dictionary".to_string(),
            ));
        };

        if let Some(archiver) = dict.get("$archiver").and_then(|v| v.as_string()) {
            if archiver != KEYED_ARCHIVER {
                debug!(archiver, "Unexpected $archiver, decoding anyway");
            }
        }

        let objects = match dict.remove("$objects") {
            Some(plist::Value::Array(items)) => items.into_iter().map(Value::from).collect(),
            Some(_) => return Err(FormatError::unexpected("$objects", "an array")),
            None => return Err(FormatError::missing("$objects")),
        };
        let top = match dict.remove("$top") {
            Some(v @ plist::Value::Dictionary(_)) => Value::from(v),
            Some(_) => return Err(FormatError::unexpected("$top", "a dictionary")),
            None => return Err(FormatError::missing("$top")),
        };
        if !top.is_record() {
            return Err(FormatError::unexpected("$top", "a dictionary"));
        }

        Ok(Self {
            top,
            pool: ObjectPool::new(objects),
        })
    }

    /// Build directly from parts.
    pub fn from_parts(top: Vec<(String, Value)>, objects: Vec<Value>) -> Self {
        Self {
            top: Value::Record(top),
            pool: ObjectPool::new(objects),
        }
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    /// Resolve a well-known `$top` entry (`"root"`, `"metadata"`).
    pub fn top_object(&self, name: &str) -> std::result::Result<&Value, FormatError> {
        let reference = self
            .top
            .field(name)
            .ok_or_else(|| FormatError::missing(format!("$top.{name}")))?;
        self.pool
            .follow(reference)?
            .ok_or_else(|| FormatError::missing(format!("$top.{name}")))
    }
}

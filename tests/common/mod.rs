//! Builders for binary `.ichat` fixtures.
//!
//! Fixtures are laid out the way the extractor expects: `$top.metadata` is a
//! dictionary whose `NS.objects` holds the participant names at slot 3 and
//! identities at slot 4; `$top.root` is an array of
//! `[service, $null, messages]`.

#![allow(dead_code)]

use std::path::Path;

use chrono::{TimeZone, Utc};
use plist::{Dictionary, Uid, Value};

pub const GUID_ATTRIBUTE: &str = "__kIMFileTransferGUIDAttributeName";
pub const FILENAME_ATTRIBUTE: &str = "__kIMFilenameAttributeName";

/// Seconds since 2001-01-01T00:00:00Z for a UTC calendar time.
pub fn apple_seconds(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> f64 {
    let unix = Utc
        .with_ymd_and_hms(year, month, day, hour, min, sec)
        .unwrap()
        .timestamp();
    (unix - 978_307_200) as f64
}

/// One message record of a fixture archive.
#[derive(Debug, Clone)]
pub struct FixtureMessage {
    pub sender: String,
    pub subject: Option<String>,
    pub time: f64,
    pub guid: Option<String>,
    pub text: String,
    /// `(transfer GUID, file name)` per attachment.
    pub attachments: Vec<(String, String)>,
    /// Store the text in `OriginalMessage` instead of rich text.
    pub legacy: bool,
}

impl FixtureMessage {
    pub fn new(sender: &str, time: f64, text: &str) -> Self {
        Self {
            sender: sender.to_string(),
            subject: None,
            time,
            guid: Some(format!("MSG-{}", time as i64)),
            text: text.to_string(),
            attachments: Vec::new(),
            legacy: false,
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn attachment(mut self, guid: &str, file_name: &str) -> Self {
        self.attachments
            .push((guid.to_string(), file_name.to_string()));
        self
    }

    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self.guid = None;
        self
    }
}

/// A whole `.ichat` archive.
#[derive(Debug, Clone)]
pub struct FixtureArchive {
    pub service: String,
    pub names: Vec<String>,
    pub ids: Vec<String>,
    pub messages: Vec<FixtureMessage>,
}

impl FixtureArchive {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            names: Vec::new(),
            ids: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Add a listed participant. The first one added is the archive owner.
    pub fn participant(mut self, name: &str, id: &str) -> Self {
        self.names.push(name.to_string());
        self.ids.push(id.to_string());
        self
    }

    pub fn message(mut self, message: FixtureMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn to_plist(&self) -> Value {
        let mut pool = Pool::new();

        let names: Vec<Uid> = self.names.iter().map(|n| pool.string(n)).collect();
        let names = pool.array(names);
        let ids: Vec<Uid> = self.ids.iter().map(|i| pool.string(i)).collect();
        let ids = pool.array(ids);
        let meta_keys: Vec<Uid> = ["Version", "Service", "Created", "PresentityNames", "PresentityIDs"]
            .iter()
            .map(|k| pool.string(k))
            .collect();
        let version = pool.push(Value::Integer(1i64.into()));
        let service_meta = pool.string(&self.service);
        let metadata = pool.dict_raw(
            meta_keys,
            vec![version, service_meta, Pool::null(), names, ids],
        );

        let mut records = Vec::with_capacity(self.messages.len());
        for m in &self.messages {
            records.push(pool.message(m));
        }
        let messages = pool.array(records);
        let service = pool.string(&self.service);
        let root = pool.array(vec![service, Pool::null(), messages]);

        let mut top = Dictionary::new();
        top.insert("metadata".to_string(), Value::Uid(metadata));
        top.insert("root".to_string(), Value::Uid(root));

        let mut dict = Dictionary::new();
        dict.insert("$archiver".to_string(), Value::String("NSKeyedArchiver".into()));
        dict.insert("$version".to_string(), Value::Integer(100_000i64.into()));
        dict.insert("$top".to_string(), Value::Dictionary(top));
        dict.insert("$objects".to_string(), Value::Array(pool.objects));
        Value::Dictionary(dict)
    }

    /// Write the archive as a binary property list, creating parent directories.
    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        self.to_plist().to_file_binary(path).unwrap();
    }
}

struct Pool {
    objects: Vec<Value>,
}

impl Pool {
    fn null() -> Uid {
        Uid::new(0)
    }

    fn new() -> Self {
        Self {
            objects: vec![Value::String("$null".into())],
        }
    }

    fn push(&mut self, value: Value) -> Uid {
        self.objects.push(value);
        Uid::new(self.objects.len() as u64 - 1)
    }

    fn string(&mut self, s: &str) -> Uid {
        self.push(Value::String(s.to_string()))
    }

    fn record(&mut self, fields: Vec<(&str, Value)>) -> Uid {
        let mut dict = Dictionary::new();
        for (k, v) in fields {
            dict.insert(k.to_string(), v);
        }
        self.push(Value::Dictionary(dict))
    }

    fn uids(items: Vec<Uid>) -> Value {
        Value::Array(items.into_iter().map(Value::Uid).collect())
    }

    fn array(&mut self, items: Vec<Uid>) -> Uid {
        self.record(vec![("NS.objects", Self::uids(items))])
    }

    fn dict_raw(&mut self, keys: Vec<Uid>, values: Vec<Uid>) -> Uid {
        self.record(vec![
            ("NS.keys", Self::uids(keys)),
            ("NS.objects", Self::uids(values)),
        ])
    }

    fn presentity(&mut self, id: &str) -> Uid {
        let id = self.string(id);
        self.record(vec![("ID", Value::Uid(id))])
    }

    fn attachment_dict(&mut self, guid: &str, file_name: &str) -> Uid {
        let keys = vec![self.string(GUID_ATTRIBUTE), self.string(FILENAME_ATTRIBUTE)];
        let values = vec![self.string(guid), self.string(file_name)];
        self.dict_raw(keys, values)
    }

    fn message(&mut self, m: &FixtureMessage) -> Uid {
        let sender = self.presentity(&m.sender);
        let time = self.record(vec![("NS.time", Value::Real(m.time))]);

        let mut fields = vec![("Sender", Value::Uid(sender)), ("Time", Value::Uid(time))];
        if let Some(subject) = &m.subject {
            let subject = self.presentity(subject);
            fields.push(("Subject", Value::Uid(subject)));
        }
        if let Some(guid) = &m.guid {
            let guid = self.string(guid);
            fields.push(("GUID", Value::Uid(guid)));
        }

        if m.legacy {
            let text = self.string(&m.text);
            fields.push(("OriginalMessage", Value::Uid(text)));
        } else {
            let raw = self.string(&m.text);
            let text = self.record(vec![("NS.string", Value::Uid(raw))]);
            let mut rich = vec![("NSString", Value::Uid(text))];
            match m.attachments.len() {
                0 => {}
                1 => {
                    let (guid, name) = &m.attachments[0];
                    let attrs = self.attachment_dict(guid, name);
                    rich.push(("NSAttributes", Value::Uid(attrs)));
                }
                _ => {
                    let dicts: Vec<Uid> = m
                        .attachments
                        .iter()
                        .map(|(guid, name)| self.attachment_dict(guid, name))
                        .collect();
                    let attrs = self.array(dicts);
                    rich.push(("NSAttributes", Value::Uid(attrs)));
                }
            }
            let rich = self.record(rich);
            fields.push(("MessageText", Value::Uid(rich)));
        }

        self.record(fields)
    }
}

//! `.ichat` archive extraction.
//!
//! An `.ichat` file is a keyed archive whose `$top` holds two references:
//!
//! - `metadata`: a dictionary whose `NS.objects` carries the participant
//!   name and identity lists at fixed positions;
//! - `root`: an array whose first element is the service name and whose third
//!   element is the array of `InstantMessage` records.
//!
//! Each message record names its fields directly (`Sender`, `Subject`, `Time`,
//! `GUID`, `MessageText` or the legacy `OriginalMessage`). Rich text carries
//! its attachments as attribute dictionaries; the flat text marks each one
//! with U+FFFC.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::error::{ArchiveError, FormatError, Result};
use crate::model::attachment::Attachment;
use crate::model::message::{placeholder_count, Message};
use crate::store::attachment::AttachmentRef;

use super::archived_map::{archived_list, archived_slot, is_archived_map, ArchivedMap};
use super::participant::{ParticipantResolver, ParticipantTable};
use super::value::{KeyedArchive, ObjectPool, Value};

/// File extension of archived conversations.
pub const ARCHIVE_EXTENSION: &str = "ichat";

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// Attribute naming the file-transfer GUID of an attachment.
pub const GUID_ATTRIBUTE: &str = "__kIMFileTransferGUIDAttributeName";

/// Attribute naming the attachment's file name.
pub const FILENAME_ATTRIBUTE: &str = "__kIMFilenameAttributeName";

const ROOT_SERVICE_SLOT: usize = 0;
const ROOT_MESSAGES_SLOT: usize = 2;

/// State for the one archive file being decoded. Dropped when the file is done.
struct FileContext<'a> {
    source: &'a Path,
    pool: &'a ObjectPool,
    service: String,
    participants: ParticipantResolver,
}

/// Decode the `.ichat` file at `path` and extract its messages in order.
pub fn extract_file(path: &Path, run: &mut RunContext) -> Result<Vec<Message>> {
    let archive = KeyedArchive::open(path)?;
    extract_archive(&archive, path, run)
}

/// Extract the messages of an already decoded archive.
///
/// `source` is recorded on every message and used in error reports.
pub fn extract_archive(
    archive: &KeyedArchive,
    source: &Path,
    run: &mut RunContext,
) -> Result<Vec<Message>> {
    let messages = extract_messages(archive, source, run)
        .map_err(|e| ArchiveError::format(source, e))?;
    debug!(
        path = %source.display(),
        count = messages.len(),
        "Extracted messages"
    );
    Ok(messages)
}

fn extract_messages(
    archive: &KeyedArchive,
    source: &Path,
    run: &mut RunContext,
) -> std::result::Result<Vec<Message>, FormatError> {
    let pool = archive.pool();
    let metadata = archive.top_object("metadata")?;
    let root = archive.top_object("root")?;

    let table = ParticipantTable::from_metadata(metadata, pool, run.options.metadata_slots)?;
    let service = pool
        .string(archived_slot(root, pool, "root", ROOT_SERVICE_SLOT)?)
        .unwrap_or_default()
        .to_string();

    let mut file = FileContext {
        source,
        pool,
        service,
        participants: ParticipantResolver::new(table),
    };

    let list = archived_slot(root, pool, "root", ROOT_MESSAGES_SLOT)?;
    let records = if list.is_null() {
        Vec::new()
    } else {
        archived_list(list, pool)?
    };

    let mut messages = Vec::with_capacity(records.len());
    for record in records {
        if record.is_null() {
            continue;
        }
        let is_first = messages.is_empty();
        messages.push(extract_message(record, &mut file, run, is_first)?);
    }
    Ok(messages)
}

fn extract_message(
    record: &Value,
    file: &mut FileContext<'_>,
    run: &mut RunContext,
    is_first_in_file: bool,
) -> std::result::Result<Message, FormatError> {
    let pool = file.pool;

    let sender_ref = record
        .field("Sender")
        .ok_or_else(|| FormatError::missing("Sender"))?;
    let sender = file.participants.resolve(sender_ref, pool, &run.options)?;

    let thread_subject = match record.field("Subject") {
        Some(subject) if pool.follow(subject)?.is_some() => {
            Some(file.participants.resolve(subject, pool, &run.options)?)
        }
        _ => None,
    };
    let who = match &thread_subject {
        Some(subject) if run.options.thread_identity.use_subject(&sender.id) => subject.clone(),
        _ => sender.clone(),
    };

    let date = decode_time(pool.required_field(record, "Time")?, pool)?;
    let guid = pool
        .string_field(record, "GUID")
        .unwrap_or_default()
        .to_string();

    let (text, attachments) = match pool.field(record, "MessageText")? {
        Some(rich) => decode_rich_text(rich, file, run)?,
        None => (
            pool.string_field(record, "OriginalMessage")
                .unwrap_or_default()
                .to_string(),
            Vec::new(),
        ),
    };

    let placeholders = placeholder_count(&text);
    if placeholders != attachments.len() {
        return Err(FormatError::AttachmentCountMismatch {
            placeholders,
            attachments: attachments.len(),
        });
    }

    Ok(Message {
        source_file: file.source.to_path_buf(),
        sender,
        thread_subject,
        who,
        guid,
        date,
        text,
        attachments,
        service: file.service.clone(),
        is_first_in_file,
    })
}

/// Flat text and resolved attachments of an attributed-string record.
fn decode_rich_text(
    rich: &Value,
    file: &FileContext<'_>,
    run: &mut RunContext,
) -> std::result::Result<(String, Vec<Attachment>), FormatError> {
    let pool = file.pool;
    let mut attachments = Vec::new();

    if let Some(attributes) = pool.field(rich, "NSAttributes")? {
        for descriptor in attribute_descriptors(attributes, pool)? {
            let map = ArchivedMap::build(descriptor, pool)?;
            let Some(reference) = attachment_ref(&map, pool) else {
                continue;
            };
            let attachment = match run.attachments.resolve(&reference) {
                Ok(a) => a,
                Err(e) => {
                    warn!(
                        path = %file.source.display(),
                        file = %reference.file_name,
                        error = %e,
                        "Could not resolve attachment"
                    );
                    run.attachments.note_unresolved();
                    Attachment::unresolved(reference.file_name)
                }
            };
            attachments.push(attachment);
        }
    }

    let text = match pool.field(rich, "NSString")? {
        Some(s) => pool
            .string(s)
            .ok_or_else(|| FormatError::unexpected("NSString", "a string"))?
            .to_string(),
        None => String::new(),
    };
    Ok((text, attachments))
}

/// Attribute dictionaries of a rich-text record: one map, or a list of them.
fn attribute_descriptors<'a>(
    attributes: &'a Value,
    pool: &'a ObjectPool,
) -> std::result::Result<Vec<&'a Value>, FormatError> {
    if is_archived_map(attributes) {
        return Ok(vec![attributes]);
    }
    let items: Vec<&Value> = match attributes {
        Value::Record(_) => archived_list(attributes, pool)?,
        Value::Array(items) => items
            .iter()
            .map(|v| pool.follow(v).map(|r| r.unwrap_or(&Value::Null)))
            .collect::<std::result::Result<_, _>>()?,
        other => {
            return Err(FormatError::unexpected(
                format!("NSAttributes ({})", other.kind()),
                "a dictionary or a list",
            ))
        }
    };
    Ok(items
        .into_iter()
        .filter(|item| {
            let keep = is_archived_map(item);
            if !keep && !item.is_null() {
                debug!(kind = item.kind(), "Skipping non-dictionary attribute");
            }
            keep
        })
        .collect())
}

/// The attachment named by an attribute dictionary, if it names one.
pub fn attachment_ref(map: &ArchivedMap<'_>, pool: &ObjectPool) -> Option<AttachmentRef> {
    let guid = map.get(GUID_ATTRIBUTE).and_then(|v| pool.string(v))?;
    let file_name = map.get(FILENAME_ATTRIBUTE).and_then(|v| pool.string(v))?;
    Some(AttachmentRef {
        guid: guid.to_string(),
        file_name: file_name.to_string(),
    })
}

/// Decode a `Time` value: an `NSDate` record, a bare number, or a native date.
fn decode_time(value: &Value, pool: &ObjectPool) -> std::result::Result<DateTime<Utc>, FormatError> {
    let seconds = match value {
        Value::Record(_) => pool
            .required_field(value, "NS.time")?
            .as_f64()
            .ok_or_else(|| FormatError::unexpected("NS.time", "a number"))?,
        Value::Real(_) | Value::Integer(_) => value.as_f64().unwrap_or_default(),
        Value::Date(t) => return Ok(DateTime::<Utc>::from(*t)),
        other => {
            return Err(FormatError::unexpected(
                format!("Time ({})", other.kind()),
                "a date",
            ))
        }
    };
    apple_time_to_utc(seconds).ok_or_else(|| FormatError::unexpected("Time", "a representable instant"))
}

/// Convert seconds since 2001-01-01T00:00:00Z into a UTC timestamp.
pub fn apple_time_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    let secs = i64::try_from(whole as i128).ok()?.checked_add(APPLE_EPOCH_OFFSET)?;
    DateTime::from_timestamp(secs, nanos)
}

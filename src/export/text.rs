//! Export each year's messages as a plain-text transcript.

use std::path::{Path, PathBuf};

use crate::model::message::Message;

/// Write `<output_dir>/<year>.txt`. Returns the path of the created file.
pub fn export_year_text(year: i32, messages: &[Message], output_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{year}.txt"));
    std::fs::write(&path, render_transcript(messages))?;
    Ok(path)
}

/// Render messages as text, one line per message, with a banner at each thread boundary.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        if msg.is_first_in_file {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "== {} ({}) [{}]\n",
                msg.who,
                msg.service,
                msg.source_file.display()
            ));
        }

        let from = if msg.is_from_me() {
            "me".to_string()
        } else {
            msg.sender.name.clone()
        };
        out.push_str(&format!(
            "{}  {}: {}\n",
            msg.date.format("%Y-%m-%d %H:%M:%S"),
            from,
            inline_attachments(msg)
        ));
    }
    out
}

/// Replace each placeholder with a bracketed attachment reference.
fn inline_attachments(msg: &Message) -> String {
    let mut text = String::with_capacity(msg.text.len());
    for (segment, attachment) in msg.segments() {
        text.push_str(segment);
        if let Some(att) = attachment {
            match &att.path {
                Some(p) => {
                    text.push_str(&format!("[attachment: {} ({})]", att.file_name, p.display()));
                }
                None => {
                    text.push_str(&format!("[attachment: {} (missing)]", att.file_name));
                }
            }
        }
    }
    text.replace('\n', "\n    ")
}

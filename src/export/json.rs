//! Export each year's messages as a JSON document for an external renderer.

use std::path::{Path, PathBuf};

use crate::model::message::Message;

/// Serialized form of one year's messages.
#[derive(Debug, serde::Serialize)]
struct YearDocument<'a> {
    year: i32,
    count: usize,
    messages: &'a [Message],
}

/// Write `<output_dir>/<year>.json`. Returns the path of the created file.
pub fn export_year_json(year: i32, messages: &[Message], output_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{year}.json"));
    let doc = YearDocument {
        year,
        count: messages.len(),
        messages,
    };
    let file = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &doc)?;
    Ok(path)
}

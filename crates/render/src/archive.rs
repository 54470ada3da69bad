//! ZIP bundling of rendered documents.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use payroll_core::types::Period;

use crate::{DocumentKind, RenderedDocument};

/// A finished archive; `entries` lists file names in the order they were written.
#[derive(Debug, Clone)]
pub struct Archive {
    filename: String,
    bytes: Vec<u8>,
    entries: Vec<String>,
}

impl Archive {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to write archive entry: {0}")]
    Io(#[from] std::io::Error),
}

/// `<kind>-<month>-<year>.zip`
pub fn archive_filename(kind: DocumentKind, period: Period) -> String {
    format!("{}-{}.zip", kind.slug(), period.slug())
}

/// Bundles `documents` in the given order. Entry names that repeat get `-2`,
/// `-3`, ... inserted before the extension so no document is lost.
pub fn assemble(
    kind: DocumentKind,
    period: Period,
    documents: &[RenderedDocument],
) -> Result<Archive, ArchiveError> {
    let names = unique_names(documents.iter().map(RenderedDocument::filename));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, document) in names.iter().zip(documents) {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(document.bytes())?;
    }
    let bytes = writer.finish()?.into_inner();

    Ok(Archive {
        filename: archive_filename(kind, period),
        bytes,
        entries: names,
    })
}

fn unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut resolved = Vec::new();
    for name in names {
        let candidate = if taken.contains(name) {
            let (stem, extension) = split_extension(name);
            (2..)
                .map(|suffix| format!("{stem}-{suffix}{extension}"))
                .find(|candidate| !taken.contains(candidate))
                .unwrap_or_else(|| name.to_string())
        } else {
            name.to_string()
        };
        taken.insert(candidate.clone());
        resolved.push(candidate);
    }
    resolved
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

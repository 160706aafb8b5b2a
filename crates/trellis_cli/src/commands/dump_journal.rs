//! Dump journal command implementation.

use super::{hex_encode, open_journal, CliResult, OutputFormat};
use serde::Serialize;
use std::path::Path;
use trellis_core::{EntryType, JournalEntry};

/// Journal entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Entry type, or `CORRUPT` for an entry that failed to decode.
    pub entry_type: String,
    /// Component label (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Component token, hex-encoded (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Payload size in bytes (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    /// Slot index of a BLOCK entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    /// Record position of an OBJECT entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    /// Decode error (if the entry is corrupt).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntryInfo {
    fn from_entry(offset: u64, entry: &JournalEntry) -> Self {
        let mut info = Self {
            offset,
            entry_type: entry.entry_type().name().to_string(),
            component: entry.component().map(|id| id.label().to_string()),
            token: entry.component().map(|id| hex_encode(id.as_bytes())),
            payload_size: (!entry.is_marker()).then_some(entry.payload().len()),
            block_index: None,
            position: None,
            error: None,
        };
        match entry.entry_type() {
            EntryType::Block => {
                info.block_index = entry.block_parts().ok().map(|(index, _)| index);
            }
            EntryType::Object => {
                info.position = entry
                    .payload()
                    .get(..8)
                    .and_then(|bytes| bytes.try_into().ok())
                    .map(u64::from_le_bytes);
            }
            _ => {}
        }
        info
    }

    fn corrupt(offset: u64, message: String) -> Self {
        Self {
            offset,
            entry_type: "CORRUPT".to_string(),
            component: None,
            token: None,
            payload_size: None,
            block_index: None,
            position: None,
            error: Some(message),
        }
    }
}

/// Runs the dump-journal command.
pub fn run(path: &Path, limit: Option<usize>, offset: u64, format: OutputFormat) -> CliResult<()> {
    let entries = read_entries(path, offset, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => print_text_output(&entries),
    }

    Ok(())
}

/// Decodes up to `limit` entries starting at `offset`.
///
/// Corrupt entries are reported in place; decoding continues past them
/// where the entry length is still trustworthy.
pub fn read_entries(path: &Path, offset: u64, limit: Option<usize>) -> CliResult<Vec<EntryInfo>> {
    let journal = open_journal(path)?;
    let limit = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();

    let mut iter = journal.entries(offset)?;
    while entries.len() < limit {
        let Some(item) = iter.next() else {
            break;
        };
        match item {
            Ok((at, entry)) => entries.push(EntryInfo::from_entry(at, &entry)),
            Err(e) if e.is_corruption() => {
                let at = e.corruption_offset().unwrap_or_else(|| iter.offset());
                entries.push(EntryInfo::corrupt(at, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
    if entries.len() < limit && iter.is_torn() {
        entries.push(EntryInfo::corrupt(
            iter.offset(),
            "incomplete entry at end of journal".to_string(),
        ));
    }

    Ok(entries)
}

fn print_text_output(entries: &[EntryInfo]) {
    println!("Journal Entries ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!("[{:08}] {:10}", entry.offset, entry.entry_type);

        if let Some(ref label) = entry.component {
            print!(" component={label}");
        }
        if let Some(ref token) = entry.token {
            print!(" token={}...", &token[..8.min(token.len())]);
        }
        if let Some(index) = entry.block_index {
            print!(" block={index}");
        }
        if let Some(position) = entry.position {
            print!(" position={position}");
        }
        if let Some(size) = entry.payload_size {
            print!(" payload={size} bytes");
        }
        if let Some(ref error) = entry.error {
            print!(" error=\"{error}\"");
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::committed_and_pending;
    use tempfile::tempdir;

    #[test]
    fn dumps_every_entry_with_details() {
        let dir = tempdir().unwrap();
        drop(committed_and_pending(dir.path()));

        let entries = read_entries(dir.path(), 0, None).unwrap();
        let types: Vec<_> = entries.iter().map(|e| e.entry_type.as_str()).collect();
        assert_eq!(types, ["OBJECT", "BLOCK", "COMMIT", "BUFFER"]);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[0].position, Some(0));
        assert_eq!(entries[0].component.as_deref(), Some("test"));
        assert_eq!(entries[1].block_index, Some(3));
        assert!(entries[2].component.is_none());
        assert!(entries[2].payload_size.is_none());
        assert_eq!(entries[3].payload_size, Some(7));
    }

    #[test]
    fn limit_and_offset() {
        let dir = tempdir().unwrap();
        drop(committed_and_pending(dir.path()));
        let all = read_entries(dir.path(), 0, None).unwrap();

        let page = read_entries(dir.path(), all[1].offset, Some(2)).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].entry_type, "BLOCK");
        assert_eq!(page[1].entry_type, "COMMIT");
    }

    #[test]
    fn torn_tail_is_reported() {
        let dir = tempdir().unwrap();
        let journal = committed_and_pending(dir.path());
        let size = journal.size().unwrap();
        journal.truncate(size - 2).unwrap();
        drop(journal);

        let entries = read_entries(dir.path(), 0, None).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].entry_type, "CORRUPT");
        assert!(entries[3].error.is_some());
    }

    #[test]
    fn missing_journal_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_entries(dir.path(), 0, None),
            Err(crate::commands::CliError::NoJournal(_))
        ));
    }
}

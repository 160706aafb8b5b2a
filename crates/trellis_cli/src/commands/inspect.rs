//! Inspect command implementation.

use super::{open_journal, CliResult, OutputFormat};
use serde::Serialize;
use std::fs;
use std::path::Path;
use trellis_core::JournalControl;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Number of decoded journal entries.
    pub entry_count: u64,
    /// OBJECT entries.
    pub objects: u64,
    /// BLOCK entries.
    pub blocks: u64,
    /// BUFFER entries.
    pub buffers: u64,
    /// COMMIT markers.
    pub commits: u64,
    /// ABORT markers.
    pub aborts: u64,
    /// CHECKPOINT markers.
    pub checkpoints: u64,
    /// Entries that failed to decode.
    pub corrupt_entries: usize,
    /// The journal ends in an incomplete entry.
    pub torn_tail: bool,
    /// The next open will run recovery.
    pub recovery_pending: bool,
    /// Component files in the store directory.
    pub components: Vec<ComponentFile>,
}

/// A component's base storage file.
#[derive(Debug, Serialize)]
pub struct ComponentFile {
    /// File name without extension.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let result = inspect(path)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }

    Ok(())
}

/// Collects journal statistics and component file sizes.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let journal = open_journal(path)?;
    let scan = JournalControl::scan(&journal)?;

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: scan.size,
        entry_count: scan.entries,
        objects: scan.objects,
        blocks: scan.blocks,
        buffers: scan.buffers,
        commits: scan.commits,
        aborts: scan.aborts,
        checkpoints: scan.checkpoints,
        corrupt_entries: scan.corruptions.len(),
        torn_tail: scan.torn_tail,
        recovery_pending: scan.needs_recovery(),
        components: component_files(path)?,
    })
}

fn component_files(path: &Path) -> CliResult<Vec<ComponentFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();
        if file_path.extension().is_some_and(|ext| ext == "dat") {
            let name = file_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(ComponentFile {
                name,
                size: entry.metadata()?.len(),
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("================");
    println!();
    println!("Journal:");
    println!("  Size: {} bytes", result.journal_size);
    println!("  Entries: {}", result.entry_count);
    println!(
        "  OBJECT: {}  BLOCK: {}  BUFFER: {}",
        result.objects, result.blocks, result.buffers
    );
    println!(
        "  COMMIT: {}  ABORT: {}  CHECKPOINT: {}",
        result.commits, result.aborts, result.checkpoints
    );
    if result.corrupt_entries > 0 {
        println!("  Corrupt entries: {}", result.corrupt_entries);
    }
    if result.torn_tail {
        println!("  Ends in an incomplete entry");
    }
    println!(
        "  Recovery pending: {}",
        if result.recovery_pending { "yes" } else { "no" }
    );
    println!();
    println!("Components ({}):", result.components.len());
    for file in &result.components {
        println!("  {:20} {} bytes", file.name, file.size);
    }
}

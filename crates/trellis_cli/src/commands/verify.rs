//! Verify command implementation.

use super::{open_journal, CliError, CliResult};
use std::path::Path;
use trellis_core::{JournalControl, JournalScan};

/// Runs the verify command.
///
/// Fails if recovery would refuse to open the store.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying journal at {}", path.display());
    println!();

    let scan = verify(path);
    match &scan {
        Ok(scan) => print_scan(scan),
        Err(e) => println!("  Error: {e}"),
    }

    println!();
    match scan {
        Ok(_) => {
            println!("✓ Journal verification passed");
            Ok(())
        }
        Err(e) => {
            println!("✗ Journal verification failed");
            Err(e)
        }
    }
}

/// Scans the journal and checks it for corruption in front of the last
/// COMMIT marker.
pub fn verify(path: &Path) -> CliResult<JournalScan> {
    let journal = open_journal(path)?;
    let scan = JournalControl::scan(&journal)?;
    if let Some(corrupt) = scan.fatal_corruption() {
        return Err(CliError::VerificationFailed(format!(
            "corrupt entry at offset {} precedes a commit: {}",
            corrupt.offset, corrupt.message
        )));
    }
    Ok(scan)
}

fn print_scan(scan: &JournalScan) {
    println!("  Size: {} bytes", scan.size);
    println!("  Entries: {}", scan.entries);
    println!("  Committed transactions: {}", scan.commits);
    for corrupt in &scan.corruptions {
        println!(
            "  Uncommitted corrupt entry at {} (discarded on recovery): {}",
            corrupt.offset, corrupt.message
        );
    }
    if scan.torn_tail {
        println!("  Incomplete entry at end (discarded on recovery)");
    }
}

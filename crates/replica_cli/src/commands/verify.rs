//! Verify command implementation.

use replica_core::LOG_FILE;
use replica_storage::{scan_frames, StorageError, FRAME_OVERHEAD};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Size of the log file in bytes.
    pub file_size: u64,
    /// Number of valid frames.
    pub frames: usize,
    /// Payload bytes in valid frames.
    pub payload_bytes: u64,
    /// Bytes after the last valid frame left by an interrupted write.
    pub torn_bytes: u64,
    /// Damage that is not a torn tail.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if no corruption was found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks every frame of the record log without modifying it.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let log_path = path.join(LOG_FILE);
    if !log_path.exists() {
        return Err(format!("No database found at {}", path.display()).into());
    }

    let data = std::fs::read(&log_path)?;
    let mut result = VerifyResult {
        file_size: data.len() as u64,
        ..VerifyResult::default()
    };

    match scan_frames(&data) {
        Ok(scan) => {
            result.frames = scan.records.len();
            result.payload_bytes = scan.records.iter().map(|r| r.payload.len() as u64).sum();
            result.torn_bytes = result.file_size - scan.valid_len;
        }
        Err(StorageError::Corrupted { offset, message }) => {
            result
                .errors
                .push(format!("Corrupted frame at offset {offset}: {message}"));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {}", path.display());
    println!();

    let result = verify(path)?;
    println!("  Log size:       {} bytes", result.file_size);
    println!("  Valid frames:   {}", result.frames);
    println!(
        "  Payload bytes:  {} (+{} framing)",
        result.payload_bytes,
        result.frames * FRAME_OVERHEAD
    );
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail:      {} bytes (discarded on next open)",
            result.torn_bytes
        );
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err("Verification failed".into())
    }
}

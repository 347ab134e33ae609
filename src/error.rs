use super::*;

use thiserror::Error;

/// Recoverable failures. Broken invariants panic instead.
#[derive(Debug, Error)]
pub enum FsError {
    /// The free map ran out of sectors; the failing call released whatever it had taken.
    #[error("no free sectors left on the device")]
    NoSpace,

    /// A super block or inode record failed to decode or carries the wrong magic.
    #[error("corrupt metadata at sector {sector}: {detail}")]
    Corrupt { sector: SectorId, detail: String },

    /// The sector is outside the device or not allocated to anything.
    #[error("no inode at sector {sector}")]
    NotFound { sector: SectorId },

    #[error("file length {length} exceeds the addressable maximum of {} bytes", MAX_FILE_SIZE)]
    FileTooLarge { length: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

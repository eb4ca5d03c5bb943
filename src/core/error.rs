//! Error types for the patala engine.
//!
//! Uses thiserror for structured errors. The engine never raises an error
//! across the per-portion hot path: degenerate registration and exhaustion
//! are communicated through `Option` sentinels, and these types cover the
//! remaining failures (tile acquisition, swap I/O, contract violations).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the engine.
///
/// This enum encompasses all error categories and enables automatic
/// conversion from the area-specific error types.
#[derive(Error, Debug)]
pub enum PatalaError {
    /// Region registration or tile access failed.
    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    /// Parallel processing failed.
    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    /// A flat-buffer operation failed.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// An operating-system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from region registration and tile access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// More than four regions were passed to a single registration.
    #[error("cannot register {0} regions: a set holds between 1 and 4")]
    TooManyRegions(usize),

    /// Every slot in the registration was empty.
    #[error("cannot register a set with no regions")]
    EmptyRegistration,

    /// The tile store has no tile covering the requested coordinate.
    #[error("no tile covers ({x}, {y})")]
    TileAcquire {
        /// Requested x coordinate.
        x: u32,
        /// Requested y coordinate.
        y: u32,
    },

    /// A row or column access fell outside the region's extent.
    #[error("coordinates ({x}, {y}) fall outside the region")]
    OutOfBounds {
        /// Requested x coordinate.
        x: u32,
        /// Requested y coordinate.
        y: u32,
    },

    /// Source and destination regions disagree on pixel depth.
    #[error("pixel depth mismatch: source {src} bytes, destination {dst} bytes")]
    DepthMismatch {
        /// Source bytes per pixel.
        src: u32,
        /// Destination bytes per pixel.
        dst: u32,
    },
}

/// Errors from the parallel pixel processor.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// A worker thread panicked while running the kernel. The shared
    /// iterator state is torn down; tiles pinned by the panicking worker
    /// are not released.
    #[error("a worker thread panicked inside the kernel")]
    WorkerPanicked,
}

/// Errors from TempBuf operations and the swap path.
#[derive(Error, Debug)]
pub enum BufferError {
    /// The requested depth conversion is not one the engine understands.
    #[error("no conversion between {src}-byte and {dst}-byte pixels")]
    UnsupportedConversion {
        /// Source bytes per pixel.
        src: u32,
        /// Destination bytes per pixel.
        dst: u32,
    },

    /// The buffer's pixels are swapped out and the operation needs them
    /// resident.
    #[error("buffer contents are swapped out")]
    SwappedOut,

    /// The swap file for an unswap request no longer exists.
    #[error("swap file {} is missing", path.display())]
    SwapMissing {
        /// Path the spool file was expected at.
        path: PathBuf,
    },

    /// The swap file exists but holds fewer bytes than the buffer needs.
    #[error("swap file {} is truncated: expected {expected} bytes, found {actual}", path.display())]
    SwapTruncated {
        /// Path of the spool file.
        path: PathBuf,
        /// Bytes the buffer requires.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Reading or writing a spool file failed.
    #[error("swap I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for region operations.
pub type RegionResult<T> = Result<T, RegionError>;

/// Result type alias for processor operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Result type alias for TempBuf operations.
pub type BufferResult<T> = Result<T, BufferError>;

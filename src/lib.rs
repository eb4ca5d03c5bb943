//! # Patala - Tiled Pixel-Region Engine
//!
//! Patala is the raster core for image-editing pipelines: a region iterator
//! and parallel dispatcher that let per-pixel routines (blend, composite,
//! convert) run uniformly over images whose storage is split into fixed-size
//! tiles.
//!
//! ## Features
//!
//! - **Regions**: rectangular views over tiled or flat pixel storage,
//!   walked in lock-step through tile-boundary-respecting portions
//! - **Parallel Processing**: a worker pool drives the same iterator with
//!   exactly-once portion dispatch and per-portion tile pinning
//! - **Progress & Cancellation**: serialized per-portion callbacks with a
//!   cooperative veto, resumable after a pause
//! - **Flat Buffers**: TempBuf intermediates with a single-slot write-back
//!   swap to disk
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use patala::prelude::*;
//! use std::sync::Arc;
//!
//! // A 1000x800 grayscale image backed by 64x64 tiles.
//! let image = Arc::new(TileGrid::new(1000, 800, 1));
//!
//! // Invert every pixel, across however many workers make sense.
//! let region = Region::tiled(image.clone(), 0, 0, 1000, 800, true);
//! process(
//!     |batch| {
//!         if let Some(region) = batch.get_mut(0) {
//!             for r in 0..region.height() {
//!                 for px in region.row_mut(r).iter_mut() {
//!                     *px = 255 - *px;
//!                 }
//!             }
//!         }
//!     },
//!     vec![Some(region)],
//! )?;
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`core`]: rectangle arithmetic and error types
//! - [`tiles`]: the tile store contract and an in-memory store
//! - [`region`]: the Region view, the portion iterator, and block copy
//! - [`process`]: the parallel processor and progress reporting
//! - [`tempbuf`]: flat buffers with single-slot disk swap

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod process;
pub mod region;
pub mod tempbuf;
pub mod tiles;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use patala::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::error::{
        BufferError, PatalaError, ProcessError, RegionError,
    };
    pub use crate::core::geom::PixelRect;

    // Tiles
    pub use crate::tiles::{TileGrid, TileHandle, TileStore, DEFAULT_TILE_SIZE};

    // Regions
    pub use crate::region::{copy_region, Region, RegionBatch, RegionIterator};

    // Processing
    pub use crate::process::{
        process, PixelProcessor, ProcessOptions, ProcessState, MAX_WORKERS,
    };

    // Flat buffers
    pub use crate::tempbuf::{SwapManager, TempBuf};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

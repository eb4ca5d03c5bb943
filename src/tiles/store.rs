//! The tile store contract consumed by the region engine.
//!
//! The engine never owns tiled pixel memory. It asks a [`TileStore`] for the
//! tile covering a coordinate, works through the returned [`TileHandle`],
//! and hands the handle back with a dirty verdict. Stores are free to back
//! tiles with anything (heap, memory maps, a swap file); the contract only
//! requires that a handle's pixel memory stays valid until it is released.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::core::error::RegionResult;

/// Provider of fixed-size pixel tiles for a single image.
///
/// Implementations must be reentrant under the engine's dispatch mutex:
/// `acquire` may be called for one tile while handles to other tiles are
/// outstanding. `acquire` may block (a store that spools tiles to disk will
/// fault them back in here).
pub trait TileStore: Send + Sync {
    /// Acquire the tile covering `(x, y)`.
    ///
    /// `for_write` declares intent to modify the tile's pixels, and
    /// `mark_dirty` asks the store to record the modification immediately
    /// rather than at release time. Every successful acquire must be paired
    /// with exactly one [`release`](TileStore::release).
    fn acquire(&self, x: u32, y: u32, for_write: bool, mark_dirty: bool) -> RegionResult<TileHandle>;

    /// Release a handle obtained from [`acquire`](TileStore::acquire),
    /// recording whether the tile was modified while held.
    fn release(&self, handle: TileHandle, mark_dirty: bool);

    /// Nominal tile width in pixels.
    fn tile_width(&self) -> u32;

    /// Nominal tile height in pixels.
    fn tile_height(&self) -> u32;

    /// Effective extent of the tile covering `(x, y)`.
    ///
    /// Tiles in the rightmost column and bottom row are narrower than the
    /// nominal size when the image dimensions are not tile multiples.
    /// Returns `(0, 0)` when no tile covers the coordinate.
    fn tile_extent(&self, x: u32, y: u32) -> (u32, u32);

    /// Image width in pixels.
    fn width(&self) -> u32;

    /// Image height in pixels.
    fn height(&self) -> u32;

    /// Bytes per pixel for every tile in this store.
    fn bytes_per_pixel(&self) -> u32;
}

/// A live reference to one acquired tile.
///
/// The handle carries the tile's effective geometry and a pointer to its
/// pixel memory. The pointer stays valid until the handle is released; the
/// store keeps the tile resident for as long as handles to it exist.
#[derive(Debug)]
pub struct TileHandle {
    data: NonNull<u8>,
    ewidth: u32,
    eheight: u32,
    bytes_per_pixel: u32,
    index: usize,
}

impl TileHandle {
    /// Build a handle. Called by store implementations only.
    pub fn new(data: NonNull<u8>, ewidth: u32, eheight: u32, bytes_per_pixel: u32, index: usize) -> Self {
        Self {
            data,
            ewidth,
            eheight,
            bytes_per_pixel,
            index,
        }
    }

    /// Effective width of this tile in pixels.
    pub fn ewidth(&self) -> u32 {
        self.ewidth
    }

    /// Effective height of this tile in pixels.
    pub fn eheight(&self) -> u32 {
        self.eheight
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Bytes between the starts of consecutive tile rows.
    pub fn row_stride(&self) -> usize {
        self.ewidth as usize * self.bytes_per_pixel as usize
    }

    /// Store-private identifier, opaque to the engine.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pointer to the pixel at tile-local coordinate `(tx, ty)`.
    pub fn data_at(&self, tx: u32, ty: u32) -> NonNull<u8> {
        debug_assert!(
            tx < self.ewidth && ty < self.eheight,
            "tile-local ({tx}, {ty}) outside {}x{} tile",
            self.ewidth,
            self.eheight
        );
        let offset = ty as usize * self.row_stride() + tx as usize * self.bytes_per_pixel as usize;
        // SAFETY: offset stays inside the tile's allocation for in-bounds
        // coordinates, which the debug assertion checks.
        unsafe { NonNull::new_unchecked(self.data.as_ptr().add(offset)) }
    }
}

/// An extra reference held on a tile while a kernel runs outside the
/// dispatch mutex.
///
/// Workers pin the tiles of their region snapshots so a concurrent advance
/// on the shared iterator cannot let the store evict pixel memory the
/// kernel is still touching.
pub struct TilePin {
    store: Arc<dyn TileStore>,
    handle: TileHandle,
    dirty: bool,
}

impl TilePin {
    pub(crate) fn new(store: Arc<dyn TileStore>, handle: TileHandle, dirty: bool) -> Self {
        Self { store, handle, dirty }
    }

    /// Drop the pin, reporting the region's dirty verdict to the store.
    pub fn release(self) {
        self.store.release(self.handle, self.dirty);
    }
}

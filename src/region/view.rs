//! The steppable pixel-region view.
//!
//! A [`Region`] is a rectangular window over pixel data that the iterator in
//! [`crate::region::iter`] walks portion by portion. The window is backed
//! either by a [`TileStore`] or by a flat caller-owned buffer; kernels and
//! copy routines read and write rows without knowing which.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::core::error::{BufferError, BufferResult, RegionError, RegionResult};
use crate::core::geom::PixelRect;
use crate::tempbuf::TempBuf;
use crate::tiles::store::{TilePin, TileStore};
use crate::tiles::TileHandle;

/// Storage behind a region. Exactly one kind is active for the life of the
/// region; a flat pointer always wins over a tile store.
#[derive(Clone)]
enum Backing<'a> {
    Tiled(Arc<dyn TileStore>),
    Flat {
        /// Address of the pixel at the region's home origin.
        base: NonNull<u8>,
        /// Bytes between consecutive buffer rows.
        stride: usize,
        /// Bytes available from `base` to the end of the buffer.
        avail: usize,
        _owner: PhantomData<&'a mut [u8]>,
    },
}

/// A rectangular, steppable view over tile-backed or flat pixel data.
///
/// Before iteration a region describes its full extent. While registered,
/// the iterator shrinks `width`/`height` to the current portion and points
/// `row`/`row_mut` at live pixel memory; those accessors are valid only
/// between one configure and the next advance.
pub struct Region<'a> {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) w: u32,
    pub(crate) h: u32,
    bytes_per_pixel: u32,
    row_stride: usize,
    data: Option<NonNull<u8>>,
    backing: Backing<'a>,
    dirty: bool,
    pub(crate) cur_tile: Option<TileHandle>,
    pub(crate) visit: u64,
    home_x: u32,
    home_y: u32,
}

// SAFETY: a region's pixel pointers are only dereferenced inside one kernel
// invocation per portion. Portions are disjoint and handed out under the
// dispatch mutex, so moving a region (or a snapshot of it) to another worker
// thread never creates two writers for the same pixels.
unsafe impl Send for Region<'_> {}

impl<'a> Region<'a> {
    /// Create a region over a tile store.
    ///
    /// `dirty` declares write intent: tiles are write-acquired and flagged
    /// modified as the iterator walks them.
    ///
    /// # Panics
    ///
    /// Panics when the rectangle does not fit inside the store's image.
    pub fn tiled(store: Arc<dyn TileStore>, x: u32, y: u32, w: u32, h: u32, dirty: bool) -> Region<'a> {
        assert!(
            x.checked_add(w).is_some_and(|r| r <= store.width())
                && y.checked_add(h).is_some_and(|b| b <= store.height()),
            "region ({x}, {y}) {w}x{h} exceeds the {}x{} store",
            store.width(),
            store.height()
        );
        let bytes_per_pixel = store.bytes_per_pixel();

        Region {
            x,
            y,
            w,
            h,
            bytes_per_pixel,
            row_stride: 0,
            data: None,
            backing: Backing::Tiled(store),
            dirty,
            cur_tile: None,
            visit: 0,
            home_x: x,
            home_y: y,
        }
    }

    /// Create a region over a flat buffer whose rows are `row_stride` bytes
    /// apart. `(x, y)` addresses the region's top-left corner within the
    /// buffer.
    ///
    /// # Panics
    ///
    /// Panics when the rectangle reaches past the end of the buffer.
    pub fn flat(
        data: &'a mut [u8],
        row_stride: usize,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        bytes_per_pixel: u32,
    ) -> Region<'a> {
        let bpp = bytes_per_pixel as usize;
        let offset = y as usize * row_stride + x as usize * bpp;
        if w > 0 && h > 0 {
            let last = offset + (h as usize - 1) * row_stride + w as usize * bpp;
            assert!(
                last <= data.len(),
                "region ({x}, {y}) {w}x{h} reaches past the {}-byte buffer",
                data.len()
            );
        }
        let avail = data.len() - offset.min(data.len());
        // SAFETY: offset is within the slice per the assertion above (and
        // unused when the region is degenerate).
        let base = unsafe { NonNull::new_unchecked(data.as_mut_ptr().add(offset.min(data.len()))) };

        Region {
            x,
            y,
            w,
            h,
            bytes_per_pixel,
            row_stride: 0,
            data: None,
            backing: Backing::Flat {
                base,
                stride: row_stride,
                avail,
                _owner: PhantomData,
            },
            dirty: false,
            cur_tile: None,
            visit: 0,
            home_x: x,
            home_y: y,
        }
    }

    /// Create a flat region over a [`TempBuf`]'s storage. `(x, y)` is
    /// buffer-local. Fails when the buffer's pixels are swapped out.
    pub fn from_temp_buf(buf: &'a mut TempBuf, x: u32, y: u32, w: u32, h: u32) -> BufferResult<Region<'a>> {
        let bpp = buf.bytes_per_pixel();
        let stride = buf.width() as usize * bpp as usize;
        let data = buf.data_mut().ok_or(BufferError::SwappedOut)?;
        Ok(Region::flat(data, stride, x, y, w, h, bpp))
    }

    /// Current x origin, in the backing's coordinate space.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Current y origin, in the backing's coordinate space.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Current width: the full extent before registration, the portion
    /// width while iterating.
    pub fn width(&self) -> u32 {
        self.w
    }

    /// Current height.
    pub fn height(&self) -> u32 {
        self.h
    }

    /// Bytes per pixel, fixed for the life of the region.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Bytes between consecutive rows of the configured data window. Only
    /// meaningful while the region is configured.
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Whether the region is backed by a tile store.
    pub fn is_tiled(&self) -> bool {
        matches!(self.backing, Backing::Tiled(_))
    }

    /// Whether tiles touched through this region are marked modified.
    pub fn marks_dirty(&self) -> bool {
        self.dirty
    }

    /// The current window as a rectangle.
    pub fn rect(&self) -> PixelRect {
        PixelRect::new(self.x, self.y, self.w, self.h)
    }

    /// Row `r` of the current portion, `width * bytes_per_pixel` bytes.
    ///
    /// # Panics
    ///
    /// Panics when `r` is out of range or the region is not configured to a
    /// portion (outside a registration, or after the iterator advanced).
    pub fn row(&self, r: u32) -> &[u8] {
        let (ptr, len) = self.row_span(r);
        // SAFETY: the span lies inside the configured tile or flat buffer;
        // see row_span.
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
    }

    /// Mutable row `r` of the current portion.
    ///
    /// # Panics
    ///
    /// Same conditions as [`row`](Region::row).
    pub fn row_mut(&mut self, r: u32) -> &mut [u8] {
        let (ptr, len) = self.row_span(r);
        // SAFETY: as for row; the &mut receiver keeps the span unaliased
        // within this region.
        unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) }
    }

    fn row_span(&self, r: u32) -> (NonNull<u8>, usize) {
        let data = match self.data {
            Some(data) => data,
            None => panic!("region row access outside a configured portion"),
        };
        assert!(r < self.h, "row {r} out of range for portion height {}", self.h);
        let len = self.w as usize * self.bytes_per_pixel as usize;
        // SAFETY: the configure step validated that h rows of this stride
        // fit in the backing storage.
        let ptr = unsafe { NonNull::new_unchecked(data.as_ptr().add(r as usize * self.row_stride)) };
        (ptr, len)
    }

    /// Read a horizontal span starting at `(x, y)` into `out`. The span
    /// width is `out.len() / bytes_per_pixel`. Coordinates are absolute in
    /// the backing's space; the region must not be mid-iteration.
    pub fn read_row(&self, x: u32, y: u32, out: &mut [u8]) -> RegionResult<()> {
        let w = self.span_len(out.len());
        self.check_bounds(x, y, w, 1)?;
        match &self.backing {
            Backing::Flat { base, stride, .. } => {
                let off = self.flat_offset(x, y, *stride);
                // SAFETY: check_bounds confirmed the span is inside the
                // region, which the constructor confirmed is inside the
                // buffer.
                unsafe {
                    std::ptr::copy_nonoverlapping(base.as_ptr().add(off), out.as_mut_ptr(), out.len());
                }
                Ok(())
            }
            Backing::Tiled(store) => {
                let store = store.clone();
                let tw = store.tile_width();
                let th = store.tile_height();
                let bpp = self.bytes_per_pixel as usize;
                let mut cur_x = x;
                let mut off = 0usize;
                while off < out.len() {
                    let handle = store.acquire(cur_x, y, false, false)?;
                    let tx = cur_x % tw;
                    let ty = y % th;
                    let n = ((handle.ewidth() - tx) as usize * bpp).min(out.len() - off);
                    let src = handle.data_at(tx, ty);
                    // SAFETY: n bytes from (tx, ty) stay inside the tile row.
                    unsafe {
                        std::ptr::copy_nonoverlapping(src.as_ptr(), out[off..].as_mut_ptr(), n);
                    }
                    store.release(handle, false);
                    cur_x += (n / bpp) as u32;
                    off += n;
                }
                Ok(())
            }
        }
    }

    /// Write a horizontal span starting at `(x, y)` from `src`. Tiles the
    /// span touches are write-acquired and marked dirty.
    pub fn write_row(&mut self, x: u32, y: u32, src: &[u8]) -> RegionResult<()> {
        let w = self.span_len(src.len());
        self.check_bounds(x, y, w, 1)?;
        match &self.backing {
            Backing::Flat { base, stride, .. } => {
                let off = self.flat_offset(x, y, *stride);
                // SAFETY: bounds checked as in read_row; the &mut receiver
                // makes the destination unaliased.
                unsafe {
                    std::ptr::copy_nonoverlapping(src.as_ptr(), base.as_ptr().add(off), src.len());
                }
                Ok(())
            }
            Backing::Tiled(store) => {
                let store = store.clone();
                let tw = store.tile_width();
                let th = store.tile_height();
                let bpp = self.bytes_per_pixel as usize;
                let mut cur_x = x;
                let mut off = 0usize;
                while off < src.len() {
                    let handle = store.acquire(cur_x, y, true, true)?;
                    let tx = cur_x % tw;
                    let ty = y % th;
                    let n = ((handle.ewidth() - tx) as usize * bpp).min(src.len() - off);
                    let dst = handle.data_at(tx, ty);
                    // SAFETY: n bytes from (tx, ty) stay inside the tile row.
                    unsafe {
                        std::ptr::copy_nonoverlapping(src[off..].as_ptr(), dst.as_ptr(), n);
                    }
                    store.release(handle, true);
                    cur_x += (n / bpp) as u32;
                    off += n;
                }
                Ok(())
            }
        }
    }

    /// Read a vertical span starting at `(x, y)` into `out`. The span
    /// height is `out.len() / bytes_per_pixel`.
    pub fn read_col(&self, x: u32, y: u32, out: &mut [u8]) -> RegionResult<()> {
        let h = self.span_len(out.len());
        self.check_bounds(x, y, 1, h)?;
        let bpp = self.bytes_per_pixel as usize;
        match &self.backing {
            Backing::Flat { base, stride, .. } => {
                let mut off = self.flat_offset(x, y, *stride);
                for chunk in out.chunks_exact_mut(bpp) {
                    // SAFETY: every row offset was covered by check_bounds.
                    unsafe {
                        std::ptr::copy_nonoverlapping(base.as_ptr().add(off), chunk.as_mut_ptr(), bpp);
                    }
                    off += stride;
                }
                Ok(())
            }
            Backing::Tiled(store) => {
                let store = store.clone();
                let tw = store.tile_width();
                let th = store.tile_height();
                let mut cur_y = y;
                let mut off = 0usize;
                while off < out.len() {
                    let handle = store.acquire(x, cur_y, false, false)?;
                    let tx = x % tw;
                    let ty = cur_y % th;
                    let rows = ((handle.eheight() - ty) as usize).min((out.len() - off) / bpp);
                    for r in 0..rows {
                        let src = handle.data_at(tx, ty + r as u32);
                        // SAFETY: one pixel per row, inside the tile.
                        unsafe {
                            std::ptr::copy_nonoverlapping(src.as_ptr(), out[off + r * bpp..].as_mut_ptr(), bpp);
                        }
                    }
                    store.release(handle, false);
                    cur_y += rows as u32;
                    off += rows * bpp;
                }
                Ok(())
            }
        }
    }

    /// Write a vertical span starting at `(x, y)` from `src`.
    pub fn write_col(&mut self, x: u32, y: u32, src: &[u8]) -> RegionResult<()> {
        let h = self.span_len(src.len());
        self.check_bounds(x, y, 1, h)?;
        let bpp = self.bytes_per_pixel as usize;
        match &self.backing {
            Backing::Flat { base, stride, .. } => {
                let mut off = self.flat_offset(x, y, *stride);
                for chunk in src.chunks_exact(bpp) {
                    // SAFETY: bounds as in read_col, unaliased via &mut.
                    unsafe {
                        std::ptr::copy_nonoverlapping(chunk.as_ptr(), base.as_ptr().add(off), bpp);
                    }
                    off += stride;
                }
                Ok(())
            }
            Backing::Tiled(store) => {
                let store = store.clone();
                let tw = store.tile_width();
                let th = store.tile_height();
                let mut cur_y = y;
                let mut off = 0usize;
                while off < src.len() {
                    let handle = store.acquire(x, cur_y, true, true)?;
                    let tx = x % tw;
                    let ty = cur_y % th;
                    let rows = ((handle.eheight() - ty) as usize).min((src.len() - off) / bpp);
                    for r in 0..rows {
                        let dst = handle.data_at(tx, ty + r as u32);
                        // SAFETY: one pixel per row, inside the tile.
                        unsafe {
                            std::ptr::copy_nonoverlapping(src[off + r * bpp..].as_ptr(), dst.as_ptr(), bpp);
                        }
                    }
                    store.release(handle, true);
                    cur_y += rows as u32;
                    off += rows * bpp;
                }
                Ok(())
            }
        }
    }

    fn span_len(&self, bytes: usize) -> u32 {
        let bpp = self.bytes_per_pixel as usize;
        debug_assert!(bytes % bpp == 0, "span length {bytes} is not a multiple of {bpp}");
        (bytes / bpp) as u32
    }

    fn check_bounds(&self, x: u32, y: u32, w: u32, h: u32) -> RegionResult<()> {
        let fits_x = x >= self.home_x && x as u64 + w as u64 <= self.home_x as u64 + self.w as u64;
        let fits_y = y >= self.home_y && y as u64 + h as u64 <= self.home_y as u64 + self.h as u64;
        if fits_x && fits_y {
            Ok(())
        } else {
            Err(RegionError::OutOfBounds { x, y })
        }
    }

    fn flat_offset(&self, x: u32, y: u32, stride: usize) -> usize {
        (y - self.home_y) as usize * stride + (x - self.home_x) as usize * self.bytes_per_pixel as usize
    }

    /// Largest step the region allows along x given `remaining` pixels of
    /// the registered area.
    pub(crate) fn portion_limit_x(&self, remaining: u32) -> u32 {
        match &self.backing {
            Backing::Flat { .. } => remaining,
            Backing::Tiled(store) => {
                if remaining == 0 {
                    return 0;
                }
                let tx = self.x % store.tile_width();
                let (ew, _) = store.tile_extent(self.x, self.y);
                ew.saturating_sub(tx).min(remaining)
            }
        }
    }

    /// Largest step the region allows along y given `remaining` pixels.
    pub(crate) fn portion_limit_y(&self, remaining: u32) -> u32 {
        match &self.backing {
            Backing::Flat { .. } => remaining,
            Backing::Tiled(store) => {
                if remaining == 0 {
                    return 0;
                }
                let ty = self.y % store.tile_height();
                let (_, eh) = store.tile_extent(self.x, self.y);
                eh.saturating_sub(ty).min(remaining)
            }
        }
    }

    /// Configure the region's live window for the portion at its current
    /// origin. `start` is the origin snapshot taken at registration.
    pub(crate) fn apply_portion(&mut self, start: (u32, u32), pw: u32, ph: u32) -> RegionResult<()> {
        debug_assert!(self.cur_tile.is_none(), "configure while a tile is still held");
        match &self.backing {
            Backing::Tiled(store) => {
                let store = store.clone();
                let handle = store.acquire(self.x, self.y, self.dirty, self.dirty)?;
                let tx = self.x % store.tile_width();
                let ty = self.y % store.tile_height();
                self.row_stride = handle.row_stride();
                self.data = Some(handle.data_at(tx, ty));
                self.cur_tile = Some(handle);
            }
            Backing::Flat { base, stride, avail, .. } => {
                let bpp = self.bytes_per_pixel as usize;
                let offset =
                    (self.y - start.1) as usize * stride + (self.x - start.0) as usize * bpp;
                if pw > 0 && ph > 0 {
                    debug_assert!(
                        offset + (ph as usize - 1) * stride + pw as usize * bpp <= *avail,
                        "portion escapes the flat buffer"
                    );
                }
                self.row_stride = *stride;
                // SAFETY: the registration assertion bounded the full
                // extent, and the portion stays inside it.
                self.data = Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) });
            }
        }
        self.w = pw;
        self.h = ph;
        Ok(())
    }

    /// Release the currently held tile, reporting the region's dirty flag.
    /// Invalidates the live data window.
    pub(crate) fn release_tile(&mut self) {
        if let Some(handle) = self.cur_tile.take() {
            if let Backing::Tiled(store) = &self.backing {
                store.release(handle, self.dirty);
            }
        }
        self.data = None;
    }

    /// Take an extra reference on the currently held tile so it survives a
    /// concurrent advance. Returns None for flat or unconfigured regions.
    pub(crate) fn pin(&self) -> Option<TilePin> {
        let store = match &self.backing {
            Backing::Tiled(store) if self.cur_tile.is_some() => store.clone(),
            _ => return None,
        };
        match store.acquire(self.x, self.y, self.dirty, false) {
            Ok(handle) => Some(TilePin::new(store, handle, self.dirty)),
            Err(err) => {
                log::warn!("failed to pin tile at ({}, {}): {err}", self.x, self.y);
                None
            }
        }
    }

    /// Tile geometry of the backing store, None for flat regions.
    pub(crate) fn tile_geometry(&self) -> Option<(u32, u32)> {
        match &self.backing {
            Backing::Tiled(store) => Some((store.tile_width(), store.tile_height())),
            Backing::Flat { .. } => None,
        }
    }
}

impl Clone for Region<'_> {
    /// Snapshot the region. The clone shares the live data window but never
    /// the tile reference; releasing stays with the original.
    fn clone(&self) -> Self {
        Self {
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
            bytes_per_pixel: self.bytes_per_pixel,
            row_stride: self.row_stride,
            data: self.data,
            backing: self.backing.clone(),
            dirty: self.dirty,
            cur_tile: None,
            visit: self.visit,
            home_x: self.home_x,
            home_y: self.home_y,
        }
    }
}

impl Drop for Region<'_> {
    fn drop(&mut self) {
        self.release_tile();
    }
}

impl fmt::Debug for Region<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("w", &self.w)
            .field("h", &self.h)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .field(
                "backing",
                &match self.backing {
                    Backing::Tiled(_) => "tiled",
                    Backing::Flat { .. } => "flat",
                },
            )
            .field("configured", &self.data.is_some())
            .finish()
    }
}

/// Split two mutable slot references out of a four-slot array.
pub(crate) fn split_pair<'s, 'a>(
    slots: &'s mut [Option<Region<'a>>; 4],
    a: usize,
    b: usize,
) -> (Option<&'s mut Region<'a>>, Option<&'s mut Region<'a>>) {
    assert!(a != b && a < 4 && b < 4, "slot pair ({a}, {b}) invalid");
    if a < b {
        let (left, right) = slots.split_at_mut(b);
        (left[a].as_mut(), right[0].as_mut())
    } else {
        let (left, right) = slots.split_at_mut(a);
        (right[0].as_mut(), left[b].as_mut())
    }
}

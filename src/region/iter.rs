//! Lock-step iteration over up to four regions.
//!
//! The iterator carves the registered area into portions: the largest
//! rectangles that stay inside every tile-backed region's current tile. At
//! each step it reconfigures every region's live data window to the current
//! portion, so a kernel can walk rows of all registered regions with one
//! set of loop bounds.
//!
//! Registration consumes the regions and `advance` consumes the iterator,
//! returning `None` once the area is exhausted. The handle therefore cannot
//! be used after its set has been torn down; dropping the iterator early
//! releases whatever tiles it still holds.

use crate::core::error::RegionError;
use crate::core::geom::PixelRect;
use crate::region::view::{split_pair, Region};
use crate::tiles::store::TilePin;

/// The portion snapshot a worker hands to a kernel: the registered slots,
/// cloned and configured to the current portion.
#[derive(Debug)]
pub struct RegionBatch<'a> {
    slots: [Option<Region<'a>>; 4],
    count: usize,
}

impl<'a> RegionBatch<'a> {
    /// Number of registered slots, counting empty ones.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the batch has no slots at all. Registration guarantees at
    /// least one, so this is false for batches produced by the engine.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The region in slot `i`, if one was registered there.
    pub fn get(&self, i: usize) -> Option<&Region<'a>> {
        self.slots.get(i).and_then(Option::as_ref)
    }

    /// Mutable access to the region in slot `i`.
    pub fn get_mut(&mut self, i: usize) -> Option<&mut Region<'a>> {
        self.slots.get_mut(i).and_then(Option::as_mut)
    }

    /// Mutable access to two distinct slots at once, the usual shape for
    /// source/destination kernels.
    ///
    /// # Panics
    ///
    /// Panics when `a == b` or either index is out of range.
    pub fn pair_mut(
        &mut self,
        a: usize,
        b: usize,
    ) -> (Option<&mut Region<'a>>, Option<&mut Region<'a>>) {
        split_pair(&mut self.slots, a, b)
    }
}

/// Iterator state driving 1 to 4 regions through synchronized portions.
///
/// Created by [`register`](RegionIterator::register); every call to
/// [`advance`](RegionIterator::advance) moves all regions to the next
/// portion in row-major order. The iterator frees itself when the area is
/// exhausted.
pub struct RegionIterator<'a> {
    slots: [Option<Region<'a>>; 4],
    starts: [(u32, u32); 4],
    count: usize,
    region_width: u32,
    region_height: u32,
    portion_width: u32,
    portion_height: u32,
    step: u64,
}

impl<'a> RegionIterator<'a> {
    /// Register between one and four regions and configure the first
    /// portion.
    ///
    /// The nominal area walked by the set is taken from the first non-empty
    /// slot. Empty slots are carried through to kernels as `None`. Returns
    /// `None` (with nothing acquired) when the slot list is invalid or the
    /// area is degenerate.
    pub fn register(regions: Vec<Option<Region<'a>>>) -> Option<RegionIterator<'a>> {
        let count = regions.len();
        if count == 0 || count > 4 {
            log::error!("{}", RegionError::TooManyRegions(count));
            return None;
        }
        if regions.iter().all(Option::is_none) {
            log::error!("{}", RegionError::EmptyRegistration);
            return None;
        }

        let mut slots: [Option<Region<'a>>; 4] = [None, None, None, None];
        let mut starts = [(0u32, 0u32); 4];
        let mut nominal = None;
        for (i, slot) in regions.into_iter().enumerate() {
            if let Some(mut region) = slot {
                region.visit = 0;
                starts[i] = (region.x, region.y);
                if nominal.is_none() {
                    nominal = Some((region.w, region.h));
                }
                slots[i] = Some(region);
            }
        }
        let (region_width, region_height) = nominal?;

        let iter = RegionIterator {
            slots,
            starts,
            count,
            region_width,
            region_height,
            portion_width: 0,
            portion_height: 0,
            step: 0,
        };
        iter.configure()
    }

    /// Advance every region to the next portion.
    ///
    /// Consumes the iterator and returns it back while portions remain;
    /// returns `None` once the area is exhausted, releasing all resources.
    pub fn advance(mut self) -> Option<RegionIterator<'a>> {
        self.step += 1;
        let step = self.step;
        let (pw, ph) = (self.portion_width, self.portion_height);
        let region_width = self.region_width;

        for i in 0..4 {
            let start = self.starts[i];
            if let Some(region) = self.slots[i].as_mut() {
                // One move per region per step, even if a region is
                // referenced by more than one bookkeeping slot.
                if region.visit != step {
                    region.visit = step;
                    region.release_tile();
                    region.x += pw;
                    if region.x - start.0 >= region_width {
                        region.x = start.0;
                        region.y += ph;
                    }
                }
            }
        }

        self.configure()
    }

    /// Compute the next portion and configure every region for it. Returns
    /// `None` when the portion is degenerate, dropping self (and with it
    /// any tiles still held).
    fn configure(mut self) -> Option<RegionIterator<'a>> {
        let (pw, ph) = self.compute_portion();
        if pw == 0 || ph == 0 {
            return None;
        }
        self.portion_width = pw;
        self.portion_height = ph;

        self.step += 1;
        let step = self.step;
        for i in 0..4 {
            let start = self.starts[i];
            if let Some(region) = self.slots[i].as_mut() {
                if region.visit != step {
                    region.visit = step;
                    if let Err(err) = region.apply_portion(start, pw, ph) {
                        log::error!("abandoning region set: {err}");
                        return None;
                    }
                }
            }
        }

        Some(self)
    }

    /// The largest rectangle no region objects to: limited per region by
    /// the remaining registered area and, for tile-backed regions, by the
    /// distance to the current tile's edge.
    fn compute_portion(&self) -> (u32, u32) {
        let mut pw = u32::MAX;
        let mut ph = u32::MAX;

        for i in 0..4 {
            if let Some(region) = self.slots[i].as_ref() {
                let start = self.starts[i];
                let remaining_w = self.region_width.saturating_sub(region.x - start.0);
                let remaining_h = self.region_height.saturating_sub(region.y - start.1);
                pw = pw.min(region.portion_limit_x(remaining_w));
                ph = ph.min(region.portion_limit_y(remaining_h));
            }
        }

        if pw == u32::MAX || ph == u32::MAX {
            (0, 0)
        } else {
            (pw, ph)
        }
    }

    /// The region in slot `i`, configured to the current portion.
    pub fn region(&self, i: usize) -> Option<&Region<'a>> {
        self.slots.get(i).and_then(Option::as_ref)
    }

    /// Mutable access to the region in slot `i`.
    pub fn region_mut(&mut self, i: usize) -> Option<&mut Region<'a>> {
        self.slots.get_mut(i).and_then(Option::as_mut)
    }

    /// Mutable access to two distinct slots at once.
    ///
    /// # Panics
    ///
    /// Panics when `a == b` or either index is out of range.
    pub fn pair_mut(
        &mut self,
        a: usize,
        b: usize,
    ) -> (Option<&mut Region<'a>>, Option<&mut Region<'a>>) {
        split_pair(&mut self.slots, a, b)
    }

    /// Number of registered slots, counting empty ones.
    pub fn slot_count(&self) -> usize {
        self.count
    }

    /// Nominal width of the registered area.
    pub fn region_width(&self) -> u32 {
        self.region_width
    }

    /// Nominal height of the registered area.
    pub fn region_height(&self) -> u32 {
        self.region_height
    }

    /// The current portion as an absolute rectangle in the first non-empty
    /// region's coordinate space.
    pub fn portion(&self) -> PixelRect {
        match self.slots.iter().flatten().next() {
            Some(region) => {
                PixelRect::new(region.x, region.y, self.portion_width, self.portion_height)
            }
            None => PixelRect::new(0, 0, 0, 0),
        }
    }

    /// Clone the registered slots, configured to the current portion, for
    /// use outside the dispatch lock.
    pub fn snapshot(&self) -> RegionBatch<'a> {
        RegionBatch {
            slots: self.slots.clone(),
            count: self.count,
        }
    }

    /// Tile geometry of the first tile-backed region, if any.
    pub fn tile_geometry(&self) -> Option<(u32, u32)> {
        self.slots
            .iter()
            .flatten()
            .find_map(|region| region.tile_geometry())
    }

    /// Take extra references on every held tile so a concurrent advance
    /// cannot invalidate the current portion's pixel memory.
    pub fn pin_tiles(&self) -> Vec<TilePin> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|region| region.pin())
            .collect()
    }
}

impl std::fmt::Debug for RegionIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionIterator")
            .field("count", &self.count)
            .field("region_width", &self.region_width)
            .field("region_height", &self.region_height)
            .field("portion_width", &self.portion_width)
            .field("portion_height", &self.portion_height)
            .field("step", &self.step)
            .finish()
    }
}

//! The parallel pixel processor.
//!
//! Applies a kernel to every portion produced by a [`RegionIterator`],
//! optionally across a pool of worker threads. Workers contend on one
//! mutex guarding the shared iterator; everything else (the kernel itself,
//! pixel access) runs unlocked. Portions are dispatched exactly once, in
//! raster order, regardless of worker count; which worker retires which
//! portion is unspecified.

use std::thread;

use parking_lot::Mutex;

use crate::core::error::{ProcessError, ProcessResult};
use crate::process::progress::{CancelToken, ProgressFn};
use crate::region::iter::{RegionBatch, RegionIterator};
use crate::region::view::Region;

/// Hard cap on the worker pool size.
pub const MAX_WORKERS: usize = 30;

/// Kernel type: one invocation per portion, receiving the registered slots
/// configured to that portion.
///
/// Kernels must not retain row slices past their return and must not call
/// back into the engine for the same region set. They run with no lock
/// held and may be invoked from any worker thread.
pub type Kernel<'a> = Box<dyn Fn(&mut RegionBatch<'a>) + Send + Sync + 'a>;

/// Options controlling a processing run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Worker thread count. 0 means detect from available parallelism.
    /// The pool never exceeds [`MAX_WORKERS`] or one worker per tile of
    /// the registered area.
    pub max_workers: usize,
}

impl ProcessOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum worker count. A value of 1 forces the
    /// single-threaded fast path.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }
}

/// Outcome of a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Every portion of the registered area has been processed.
    Completed,
    /// A progress callback vetoed continuation; the remaining area can be
    /// processed by calling [`PixelProcessor::run`] again.
    Paused,
}

struct DispatchState<'a> {
    iter: Option<RegionIterator<'a>>,
    first_claimed: bool,
}

/// Drives a kernel over every portion of a registered region set.
///
/// Holds the shared iterator, the kernel, and the optional progress
/// callback. `run` blocks until the area is exhausted or a progress veto
/// pauses the run; a paused processor resumes from the next unprocessed
/// portion on the next `run`.
pub struct PixelProcessor<'a> {
    state: Mutex<DispatchState<'a>>,
    kernel: Kernel<'a>,
    progress: Option<ProgressFn<'a>>,
    cancel: CancelToken,
    options: ProcessOptions,
}

impl<'a> PixelProcessor<'a> {
    /// Register `regions` for processing under `kernel`.
    ///
    /// Returns `None` when registration fails (degenerate area or invalid
    /// slot list); nothing has been acquired in that case.
    pub fn new<K>(kernel: K, regions: Vec<Option<Region<'a>>>, options: ProcessOptions) -> Option<Self>
    where
        K: Fn(&mut RegionBatch<'a>) + Send + Sync + 'a,
    {
        let iter = RegionIterator::register(regions)?;
        Some(Self {
            state: Mutex::new(DispatchState {
                iter: Some(iter),
                first_claimed: false,
            }),
            kernel: Box::new(kernel),
            progress: None,
            cancel: CancelToken::new(),
            options,
        })
    }

    /// Like [`new`](PixelProcessor::new), with a per-portion progress
    /// callback whose `false` return pauses the run.
    pub fn with_progress<K, P>(
        kernel: K,
        regions: Vec<Option<Region<'a>>>,
        options: ProcessOptions,
        progress: P,
    ) -> Option<Self>
    where
        K: Fn(&mut RegionBatch<'a>) + Send + Sync + 'a,
        P: Fn(crate::core::geom::PixelRect) -> bool + Send + Sync + 'a,
    {
        let mut processor = Self::new(kernel, regions, options)?;
        processor.progress = Some(Box::new(progress));
        Some(processor)
    }

    /// Process portions until the area is exhausted or a progress veto
    /// pauses the run. Calling `run` on a paused processor resumes it.
    pub fn run(&mut self) -> ProcessResult<ProcessState> {
        self.cancel.reset();

        let workers = self.desired_workers();
        if workers <= 1 {
            self.worker_loop(false);
        } else {
            self.run_pool(workers)?;
        }

        if self.state.lock().iter.is_none() {
            Ok(ProcessState::Completed)
        } else {
            Ok(ProcessState::Paused)
        }
    }

    /// Abandon the run, releasing all held tiles immediately.
    pub fn stop(self) {
        let mut state = self.state.lock();
        state.iter = None;
    }

    /// Worker count for this run: available parallelism (or the explicit
    /// option), capped by [`MAX_WORKERS`] and by one worker per tile of
    /// area. Flat-only sets produce a single portion and run serially.
    fn desired_workers(&self) -> usize {
        let state = self.state.lock();
        let iter = match state.iter.as_ref() {
            Some(iter) => iter,
            None => return 1,
        };
        let (tile_w, tile_h) = match iter.tile_geometry() {
            Some(geometry) => geometry,
            None => return 1,
        };

        let base = if self.options.max_workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.options.max_workers
        };
        let area = iter.region_width() as u64 * iter.region_height() as u64;
        let tiles = (area / (tile_w as u64 * tile_h as u64)).max(1) as usize;

        base.min(MAX_WORKERS).min(tiles).max(1)
    }

    fn run_pool(&self, workers: usize) -> ProcessResult<()> {
        let result = crossbeam::thread::scope(|scope| {
            for idx in 1..workers {
                let builder = scope.builder().name(format!("patala-worker-{idx}"));
                if let Err(err) = builder.spawn(|_| self.worker_loop(true)) {
                    // Never drop portions over a missing thread; the
                    // calling thread picks up the remaining work below.
                    log::warn!("worker spawn failed ({err}); continuing with fewer workers");
                    break;
                }
            }
            self.worker_loop(true);
        });
        result.map_err(|_| ProcessError::WorkerPanicked)
    }

    /// One worker's share of the run. `pinned` selects the multi-worker
    /// protocol, where each snapshot's tiles take an extra reference so a
    /// concurrent advance cannot invalidate them mid-kernel.
    fn worker_loop(&self, pinned: bool) {
        let mut state = self.state.lock();

        // The first entrant takes the portion configured at registration;
        // everyone after starts by advancing past it.
        if state.first_claimed {
            state.iter = match state.iter.take() {
                Some(iter) => iter.advance(),
                None => None,
            };
        } else {
            state.first_claimed = true;
        }
        if state.iter.is_none() {
            return;
        }

        loop {
            let iter = match state.iter.as_ref() {
                Some(iter) => iter,
                None => break,
            };
            let mut batch = iter.snapshot();
            let pins = if pinned { iter.pin_tiles() } else { Vec::new() };
            let rect = iter.portion();
            drop(state);

            (self.kernel)(&mut batch);

            state = self.state.lock();
            for pin in pins {
                pin.release();
            }
            if let Some(callback) = &self.progress {
                if !callback(rect) {
                    self.cancel.cancel();
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            state.iter = match state.iter.take() {
                Some(iter) => iter.advance(),
                None => None,
            };
            if state.iter.is_none() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for PixelProcessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelProcessor")
            .field("options", &self.options)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Process every portion of `regions` under `kernel`, blocking until done.
///
/// Degenerate registrations are a no-op. This is the common entry point
/// for fire-and-forget operations without progress reporting.
pub fn process<'a, K>(kernel: K, regions: Vec<Option<Region<'a>>>) -> ProcessResult<()>
where
    K: Fn(&mut RegionBatch<'a>) + Send + Sync + 'a,
{
    match PixelProcessor::new(kernel, regions, ProcessOptions::default()) {
        Some(mut processor) => {
            processor.run()?;
            Ok(())
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geom::PixelRect;
    use crate::region::copy::copy_region;
    use crate::tiles::{TileGrid, TileStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Kernel writing each pixel's absolute coordinate sum, so output is
    /// independent of portion shape and worker schedule.
    fn coordinate_kernel(batch: &mut RegionBatch<'_>) {
        let region = match batch.get_mut(0) {
            Some(region) => region,
            None => return,
        };
        let (x0, y0, h) = (region.x(), region.y(), region.height());
        for r in 0..h {
            let y = y0 + r;
            for (i, px) in region.row_mut(r).iter_mut().enumerate() {
                *px = ((x0 as usize + i + y as usize) & 0xff) as u8;
            }
        }
    }

    #[test]
    fn test_process_covers_whole_area() {
        let grid = Arc::new(TileGrid::new(100, 70, 1));
        let region = Region::tiled(grid.clone(), 0, 0, 100, 70, true);
        process(coordinate_kernel, vec![Some(region)]).unwrap();

        let flat = grid.to_vec();
        for y in 0..70usize {
            for x in 0..100usize {
                assert_eq!(flat[y * 100 + x], ((x + y) & 0xff) as u8, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_single_and_multi_worker_output_match() {
        let serial = Arc::new(TileGrid::new(256, 192, 1));
        let region = Region::tiled(serial.clone(), 0, 0, 256, 192, true);
        let mut processor = PixelProcessor::new(
            coordinate_kernel,
            vec![Some(region)],
            ProcessOptions::new().with_max_workers(1),
        )
        .unwrap();
        assert_eq!(processor.run().unwrap(), ProcessState::Completed);

        let parallel = Arc::new(TileGrid::new(256, 192, 1));
        let region = Region::tiled(parallel.clone(), 0, 0, 256, 192, true);
        let mut processor = PixelProcessor::new(
            coordinate_kernel,
            vec![Some(region)],
            ProcessOptions::new().with_max_workers(4),
        )
        .unwrap();
        assert_eq!(processor.run().unwrap(), ProcessState::Completed);

        assert_eq!(serial.to_vec(), parallel.to_vec());
    }

    #[test]
    fn test_each_pixel_processed_exactly_once() {
        let grid = Arc::new(TileGrid::new(192, 192, 1));

        // Increment every pixel; any double-dispatched portion would leave
        // a 2 behind.
        let increment = |batch: &mut RegionBatch<'_>| {
            if let Some(region) = batch.get_mut(0) {
                for r in 0..region.height() {
                    for px in region.row_mut(r).iter_mut() {
                        *px = px.wrapping_add(1);
                    }
                }
            }
        };

        let region = Region::tiled(grid.clone(), 0, 0, 192, 192, true);
        let mut processor = PixelProcessor::new(
            increment,
            vec![Some(region)],
            ProcessOptions::new().with_max_workers(4),
        )
        .unwrap();
        processor.run().unwrap();

        assert!(grid.to_vec().iter().all(|&px| px == 1));
    }

    #[test]
    fn test_two_region_blend_kernel() {
        let width = 100u32;
        let height = 60u32;
        let src_pixels: Vec<u8> = (0..width as usize * height as usize)
            .map(|i| (i % 127) as u8)
            .collect();

        let src_grid = Arc::new(TileGrid::new(width, height, 1));
        let mut seed = src_pixels.clone();
        let flat = Region::flat(&mut seed, width as usize, 0, 0, width, height, 1);
        let tiled = Region::tiled(src_grid.clone(), 0, 0, width, height, true);
        copy_region(flat, tiled).unwrap();

        let dst_grid = Arc::new(TileGrid::new(width, height, 1));
        let src = Region::tiled(src_grid, 0, 0, width, height, false);
        let dst = Region::tiled(dst_grid.clone(), 0, 0, width, height, true);

        let double = |batch: &mut RegionBatch<'_>| {
            let h = batch.get(0).map(Region::height).unwrap_or(0);
            let (s, d) = batch.pair_mut(0, 1);
            if let (Some(s), Some(d)) = (s, d) {
                for r in 0..h {
                    for (out, input) in d.row_mut(r).iter_mut().zip(s.row(r)) {
                        *out = input.wrapping_mul(2);
                    }
                }
            }
        };
        process(double, vec![Some(src), Some(dst)]).unwrap();

        let result = dst_grid.to_vec();
        for (i, px) in result.iter().enumerate() {
            assert_eq!(*px, src_pixels[i].wrapping_mul(2));
        }
    }

    #[test]
    fn test_degenerate_registration_is_a_no_op() {
        let grid = Arc::new(TileGrid::new(64, 64, 1));
        let region = Region::tiled(grid.clone(), 0, 0, 0, 64, true);
        assert!(PixelProcessor::new(
            coordinate_kernel,
            vec![Some(region)],
            ProcessOptions::default()
        )
        .is_none());
        assert_eq!(grid.dirty_tiles(), 0);
    }

    #[test]
    fn test_progress_reports_every_portion() {
        let grid = Arc::new(TileGrid::new(100, 100, 1));
        let region = Region::tiled(grid, 0, 0, 100, 100, true);

        let reported = Arc::new(parking_lot::Mutex::new(Vec::<PixelRect>::new()));
        let sink = reported.clone();
        let mut processor = PixelProcessor::with_progress(
            coordinate_kernel,
            vec![Some(region)],
            ProcessOptions::new().with_max_workers(1),
            move |rect| {
                sink.lock().push(rect);
                true
            },
        )
        .unwrap();
        assert_eq!(processor.run().unwrap(), ProcessState::Completed);

        let portions = reported.lock();
        assert_eq!(portions.iter().map(PixelRect::area).sum::<u64>(), 100 * 100);
    }

    #[test]
    fn test_veto_pauses_and_run_resumes() {
        let grid = Arc::new(TileGrid::new(128, 128, 1));
        let region = Region::tiled(grid.clone(), 0, 0, 128, 128, true);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut processor = PixelProcessor::with_progress(
            coordinate_kernel,
            vec![Some(region)],
            ProcessOptions::new().with_max_workers(1),
            move |_| counter.fetch_add(1, Ordering::Relaxed) != 0,
        )
        .unwrap();

        // First portion processed, then vetoed.
        assert_eq!(processor.run().unwrap(), ProcessState::Paused);
        assert_eq!(seen.load(Ordering::Relaxed), 1);

        // Resume finishes the remaining three tiles.
        assert_eq!(processor.run().unwrap(), ProcessState::Completed);
        assert_eq!(seen.load(Ordering::Relaxed), 4);

        let flat = grid.to_vec();
        for y in 0..128usize {
            for x in 0..128usize {
                assert_eq!(flat[y * 128 + x], ((x + y) & 0xff) as u8);
            }
        }
    }

    #[test]
    fn test_stop_releases_tiles() {
        let grid = Arc::new(TileGrid::new(128, 128, 1));
        let region = Region::tiled(grid.clone(), 0, 0, 128, 128, true);
        let processor = PixelProcessor::new(
            coordinate_kernel,
            vec![Some(region)],
            ProcessOptions::default(),
        )
        .unwrap();
        processor.stop();

        let handle = grid.acquire(0, 0, true, false).unwrap();
        grid.release(handle, false);
    }

    #[test]
    fn test_optional_slot_passed_as_none() {
        let grid = Arc::new(TileGrid::new(64, 64, 1));
        let region = Region::tiled(grid, 0, 0, 64, 64, true);

        let saw_none = Arc::new(AtomicUsize::new(0));
        let flag = saw_none.clone();
        let kernel = move |batch: &mut RegionBatch<'_>| {
            assert_eq!(batch.len(), 2);
            if batch.get(1).is_none() {
                flag.fetch_add(1, Ordering::Relaxed);
            }
        };
        process(kernel, vec![Some(region), None]).unwrap();
        assert_eq!(saw_none.load(Ordering::Relaxed), 1);
    }
}

//! Block transfer between regions.

use crate::core::error::{RegionError, RegionResult};
use crate::region::iter::RegionIterator;
use crate::region::view::Region;

/// Copy `src` into `dst`, portion by portion.
///
/// The copied extent is taken from `src`; both regions must share a pixel
/// depth. Either side may be tile-backed or flat, which makes this the
/// bridge between [`crate::tempbuf::TempBuf`] storage and tiled images.
pub fn copy_region(src: Region<'_>, dst: Region<'_>) -> RegionResult<()> {
    if src.bytes_per_pixel() != dst.bytes_per_pixel() {
        let err = RegionError::DepthMismatch {
            src: src.bytes_per_pixel(),
            dst: dst.bytes_per_pixel(),
        };
        log::error!("copy_region: {err}");
        return Err(err);
    }

    let mut iter = RegionIterator::register(vec![Some(src), Some(dst)]);
    while let Some(mut it) = iter {
        let height = it.portion().height;
        {
            let (s, d) = it.pair_mut(0, 1);
            let (s, d) = match (s, d) {
                (Some(s), Some(d)) => (s, d),
                _ => break,
            };
            for r in 0..height {
                d.row_mut(r).copy_from_slice(s.row(r));
            }
        }
        iter = it.advance();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::TileGrid;
    use std::sync::Arc;

    #[test]
    fn test_flat_to_tiled_and_back() {
        let width = 100u32;
        let height = 70u32;
        let mut src: Vec<u8> = (0..width as usize * height as usize)
            .map(|i| (i % 251) as u8)
            .collect();
        let grid = Arc::new(TileGrid::new(width, height, 1));

        let flat = Region::flat(&mut src, width as usize, 0, 0, width, height, 1);
        let tiled = Region::tiled(grid.clone(), 0, 0, width, height, true);
        copy_region(flat, tiled).unwrap();

        assert_eq!(grid.to_vec(), src);
        assert!(grid.dirty_tiles() > 0);

        let mut back = vec![0u8; src.len()];
        let tiled = Region::tiled(grid, 0, 0, width, height, false);
        let flat = Region::flat(&mut back, width as usize, 0, 0, width, height, 1);
        copy_region(tiled, flat).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn test_copy_into_offset_window() {
        let mut src = vec![7u8; 4 * 4];
        let mut dst = vec![0u8; 10 * 10];

        let s = Region::flat(&mut src, 4, 0, 0, 4, 4, 1);
        let d = Region::flat(&mut dst, 10, 3, 2, 4, 4, 1);
        copy_region(s, d).unwrap();

        for y in 0..10u32 {
            for x in 0..10u32 {
                let inside = (3..7).contains(&x) && (2..6).contains(&y);
                let expected = if inside { 7 } else { 0 };
                assert_eq!(dst[(y * 10 + x) as usize], expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_depth_mismatch_rejected() {
        let mut a = vec![0u8; 16];
        let mut b = vec![0u8; 32];
        let src = Region::flat(&mut a, 4, 0, 0, 4, 4, 1);
        let dst = Region::flat(&mut b, 8, 0, 0, 4, 4, 2);
        assert!(matches!(
            copy_region(src, dst),
            Err(RegionError::DepthMismatch { src: 1, dst: 2 })
        ));
    }
}

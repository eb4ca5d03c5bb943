//! Single-slot write-back swap for flat buffers.
//!
//! At most one swapped buffer stays resident in memory: the most recently
//! swapped one. Swapping another buffer evicts the previous resident to a
//! spool file under a generated unique name. The manager owns the spool
//! directory, the filename counter, and the resident slot; construct one
//! at subsystem start and keep it alive for as long as swapped buffers
//! exist.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::error::{BufferError, BufferResult};
use crate::tempbuf::buf::TempBuf;

struct Resident {
    id: u64,
    pixels: Vec<u8>,
}

struct SwapState {
    dir: PathBuf,
    next_id: u64,
    resident: Option<Resident>,
}

/// Owner of the swap spool directory and the single resident slot.
pub struct SwapManager {
    inner: Mutex<SwapState>,
}

impl SwapManager {
    /// Create a manager spooling into `dir`. The directory must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(SwapState {
                dir: dir.into(),
                next_id: 0,
                resident: None,
            }),
        }
    }

    fn spool_path(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("patala-{}-{id:08}.swp", std::process::id()))
    }

    /// Swap `buf` out. The buffer becomes the resident slot; the previous
    /// resident, if any, is written to its spool file first.
    ///
    /// A write failure leaves both buffers intact: the previous resident
    /// stays in the slot and `buf` keeps its pixels.
    pub fn swap(&self, buf: &mut TempBuf) -> BufferResult<()> {
        if buf.is_swapped() {
            return Ok(());
        }

        let mut state = self.inner.lock();
        if let Some(old) = state.resident.take() {
            let path = Self::spool_path(&state.dir, old.id);
            match fs::write(&path, &old.pixels) {
                Ok(()) => log::debug!("spooled evicted buffer to {}", path.display()),
                Err(err) => {
                    log::error!("failed to write swap file {}: {err}", path.display());
                    state.resident = Some(old);
                    return Err(BufferError::Io(err));
                }
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.resident = Some(Resident {
            id,
            pixels: std::mem::take(&mut buf.data),
        });
        buf.swap_id = Some(id);
        Ok(())
    }

    /// Bring `buf`'s pixels back. A resident hit hands the pixels straight
    /// back; otherwise the spool file is read and deleted.
    ///
    /// A missing or truncated spool file is reported as an error, and the
    /// buffer still comes back usable with zero-filled pixels rather than
    /// uninitialized memory.
    pub fn unswap(&self, buf: &mut TempBuf) -> BufferResult<()> {
        let id = match buf.swap_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let expected = buf.byte_len();
        buf.swap_id = None;

        let mut state = self.inner.lock();
        if state.resident.as_ref().map(|r| r.id) == Some(id) {
            if let Some(resident) = state.resident.take() {
                buf.data = resident.pixels;
            }
            return Ok(());
        }
        let path = Self::spool_path(&state.dir, id);
        drop(state);

        match fs::read(&path) {
            Ok(bytes) => {
                if let Err(err) = fs::remove_file(&path) {
                    log::warn!("could not delete swap file {}: {err}", path.display());
                }
                if bytes.len() == expected {
                    buf.data = bytes;
                    Ok(())
                } else {
                    log::error!(
                        "swap file {} holds {} bytes, expected {expected}; returning zeroed pixels",
                        path.display(),
                        bytes.len()
                    );
                    buf.data = vec![0u8; expected];
                    Err(BufferError::SwapTruncated {
                        path,
                        expected,
                        actual: bytes.len(),
                    })
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::error!("swap file {} is missing; returning zeroed pixels", path.display());
                buf.data = vec![0u8; expected];
                Err(BufferError::SwapMissing { path })
            }
            Err(err) => {
                log::error!("failed to read swap file {}: {err}", path.display());
                buf.data = vec![0u8; expected];
                Err(BufferError::Io(err))
            }
        }
    }

    /// Discard `buf`'s swapped pixels without reading them back, deleting
    /// the spool file or clearing the resident slot.
    pub fn swap_free(&self, buf: &mut TempBuf) {
        let id = match buf.swap_id.take() {
            Some(id) => id,
            None => return,
        };

        let mut state = self.inner.lock();
        if state.resident.as_ref().map(|r| r.id) == Some(id) {
            state.resident = None;
            return;
        }
        let path = Self::spool_path(&state.dir, id);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("could not delete swap file {}: {err}", path.display());
            }
        }
    }
}

impl Default for SwapManager {
    /// A manager spooling into the system temporary directory.
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl std::fmt::Debug for SwapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SwapManager")
            .field("dir", &state.dir)
            .field("next_id", &state.next_id)
            .field("resident", &state.resident.as_ref().map(|r| r.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spool_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| {
                let path = entry.unwrap().path();
                if path.extension().is_some_and(|ext| ext == "swp") {
                    Some(path)
                } else {
                    None
                }
            })
            .collect()
    }

    #[test]
    fn test_swap_round_trip_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SwapManager::new(dir.path());

        let mut buf = TempBuf::new_filled(8, 8, 1, &[42]);
        manager.swap(&mut buf).unwrap();
        assert!(buf.is_swapped());
        assert!(buf.data().is_none());
        // Most recent swap stays resident, nothing hits the disk yet.
        assert!(spool_files(dir.path()).is_empty());

        manager.unswap(&mut buf).unwrap();
        assert!(!buf.is_swapped());
        assert!(buf.data().unwrap().iter().all(|&b| b == 42));
    }

    #[test]
    fn test_second_swap_evicts_first_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SwapManager::new(dir.path());

        let mut first = TempBuf::new_filled(4, 4, 1, &[1]);
        let mut second = TempBuf::new_filled(4, 4, 1, &[2]);
        manager.swap(&mut first).unwrap();
        manager.swap(&mut second).unwrap();

        // The first buffer was evicted to disk; the second is resident.
        assert_eq!(spool_files(dir.path()).len(), 1);

        manager.unswap(&mut first).unwrap();
        assert!(first.data().unwrap().iter().all(|&b| b == 1));
        assert!(spool_files(dir.path()).is_empty());

        manager.unswap(&mut second).unwrap();
        assert!(second.data().unwrap().iter().all(|&b| b == 2));
    }

    #[test]
    fn test_missing_spool_file_yields_zeroed_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SwapManager::new(dir.path());

        let mut first = TempBuf::new_filled(4, 4, 1, &[7]);
        let mut second = TempBuf::new_filled(4, 4, 1, &[8]);
        manager.swap(&mut first).unwrap();
        manager.swap(&mut second).unwrap();

        for path in spool_files(dir.path()) {
            fs::remove_file(path).unwrap();
        }

        let err = manager.unswap(&mut first).unwrap_err();
        assert!(matches!(err, BufferError::SwapMissing { .. }));
        // Loud failure, but the buffer is still usable and fully zeroed.
        assert!(!first.is_swapped());
        assert!(first.data().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_truncated_spool_file_yields_zeroed_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SwapManager::new(dir.path());

        let mut first = TempBuf::new_filled(4, 4, 1, &[7]);
        let mut second = TempBuf::new_filled(4, 4, 1, &[8]);
        manager.swap(&mut first).unwrap();
        manager.swap(&mut second).unwrap();

        let files = spool_files(dir.path());
        fs::write(&files[0], [7u8; 3]).unwrap();

        let err = manager.unswap(&mut first).unwrap_err();
        assert!(matches!(err, BufferError::SwapTruncated { expected: 16, actual: 3, .. }));
        assert!(first.data().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_swap_free_deletes_spool_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SwapManager::new(dir.path());

        let mut first = TempBuf::new_filled(4, 4, 1, &[3]);
        let mut second = TempBuf::new_filled(4, 4, 1, &[4]);
        manager.swap(&mut first).unwrap();
        manager.swap(&mut second).unwrap();
        assert_eq!(spool_files(dir.path()).len(), 1);

        manager.swap_free(&mut first);
        assert!(spool_files(dir.path()).is_empty());
        assert!(!first.is_swapped());

        // Freeing the resident buffer clears the slot without touching disk.
        second.free(&manager);
    }

    #[test]
    fn test_resize_unswaps_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SwapManager::new(dir.path());

        let mut buf = TempBuf::new_filled(4, 4, 1, &[9]);
        manager.swap(&mut buf).unwrap();

        buf.resize(&manager, 2, 0, 0, 4, 4).unwrap();
        assert!(!buf.is_swapped());
        assert_eq!(buf.byte_len(), 32);
        assert_eq!(buf.data().unwrap().len(), 32);
    }
}

//! Parallel dispatch of kernels over region portions.

pub mod processor;
pub mod progress;

pub use processor::{process, Kernel, PixelProcessor, ProcessOptions, ProcessState, MAX_WORKERS};
pub use progress::{CancelToken, ProgressFn};

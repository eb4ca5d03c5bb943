//! Flat pixel buffers and the single-slot swap layer.

pub mod buf;
pub mod swap;

pub use buf::TempBuf;
pub use swap::SwapManager;

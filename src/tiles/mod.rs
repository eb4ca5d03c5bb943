//! Tile storage: the store contract and an in-memory implementation.

pub mod grid;
pub mod store;

pub use grid::{TileGrid, DEFAULT_TILE_SIZE};
pub use store::{TileHandle, TilePin, TileStore};

//! docqa-vector
//!
//! Exact nearest-neighbour search over chunk embeddings (`flat`) and the
//! on-disk pair of index blob plus chunk metadata (`store`).

pub mod flat;
pub mod store;

pub use flat::FlatIndex;
pub use store::{Store, INDEX_FILE, METADATA_FILE};

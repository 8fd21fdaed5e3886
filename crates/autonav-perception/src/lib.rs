//! `autonav-perception` – where am I, and where can I go from here.
//!
//! - [`map_file`]: the JSON map document (regions, anchors, adjacency,
//!   reference embeddings) and [`map_file::load_map`].
//! - [`region_graph`]: the immutable, validated [`RegionGraph`].
//! - [`embedding_table`]: normalised reference embeddings and similarity
//!   scoring.
//! - [`localizer`]: visual place recognition with margin-based confidence
//!   and adjacency hysteresis.

pub mod embedding_table;
pub mod localizer;
pub mod map_file;
pub mod region_graph;

pub use embedding_table::{EmbeddingTable, Metric};
pub use localizer::{Localizer, LocalizerConfig};
pub use map_file::{LoadedMap, MapFile, load_map};
pub use region_graph::RegionGraph;

//! JSON map document.
//!
//! ```json
//! { "start": "r_00",
//!   "regions": {
//!     "r_00": { "anchor": {"x": 0.0, "y": 0.0, "heading_rad": 0.0},
//!               "neighbors": ["r_01", {"id": "r_02", "cost": 2.5}],
//!               "embeddings": [[0.1, 0.9]] } } }
//! ```
//!
//! A bare neighbor id has unit cost.  The document is read once at startup;
//! any failure here is fatal.

use std::collections::BTreeMap;
use std::path::Path;

use autonav_types::{Embedding, NavError, Pose, RegionId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embedding_table::EmbeddingTable;
use crate::region_graph::RegionGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapFile {
    pub start: RegionId,
    pub regions: BTreeMap<RegionId, RegionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub anchor: Pose,
    #[serde(default)]
    pub neighbors: Vec<NeighborSpec>,
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NeighborSpec {
    Id(RegionId),
    Weighted { id: RegionId, cost: f32 },
}

impl NeighborSpec {
    pub fn id(&self) -> &RegionId {
        match self {
            NeighborSpec::Id(id) | NeighborSpec::Weighted { id, .. } => id,
        }
    }

    pub fn cost(&self) -> f32 {
        match self {
            NeighborSpec::Id(_) => 1.0,
            NeighborSpec::Weighted { cost, .. } => *cost,
        }
    }
}

impl MapFile {
    pub fn from_json(text: &str) -> Result<Self, NavError> {
        serde_json::from_str(text)
            .map_err(|e| NavError::NoEmbeddingTable(format!("malformed map document: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, NavError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NavError::NoEmbeddingTable(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

/// The validated products of a map document.
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub graph: RegionGraph,
    pub table: EmbeddingTable,
    /// The parsed document, kept for callers that need the raw views.
    pub file: MapFile,
}

/// Read, parse and validate a map document.
///
/// # Errors
///
/// [`NavError::NoEmbeddingTable`] when the file is missing, unparsable or
/// carries unusable embeddings; [`NavError::InvalidGraph`] when the
/// adjacency structure is broken.
pub fn load_map(path: &Path) -> Result<LoadedMap, NavError> {
    let file = MapFile::load(path)?;
    let graph = RegionGraph::load(&file)?;
    let table = EmbeddingTable::from_map(&file)?;
    info!(
        path = %path.display(),
        regions = graph.len(),
        embeddings = table.len(),
        dim = table.dim(),
        "map loaded"
    );
    Ok(LoadedMap { graph, table, file })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "start": "a",
        "regions": {
            "a": { "anchor": {"x": 0.0, "y": 0.0}, "neighbors": ["b"], "embeddings": [[1.0, 0.0]] },
            "b": { "anchor": {"x": 2.0, "y": 0.0}, "neighbors": [{"id": "c", "cost": 2.5}], "embeddings": [[0.0, 1.0]] },
            "c": { "anchor": {"x": 4.0, "y": 0.0, "heading_rad": 1.0}, "embeddings": [[0.7, 0.7]] }
        }
    }"#;

    #[test]
    fn parses_bare_and_weighted_neighbors() {
        let map = MapFile::from_json(SAMPLE).unwrap();
        let a = &map.regions[&RegionId::from("a")];
        assert_eq!(a.neighbors[0].id().as_str(), "b");
        assert_eq!(a.neighbors[0].cost(), 1.0);
        let b = &map.regions[&RegionId::from("b")];
        assert_eq!(b.neighbors[0].cost(), 2.5);
        assert_eq!(map.regions[&RegionId::from("c")].anchor.heading_rad, 1.0);
    }

    #[test]
    fn malformed_json_is_no_embedding_table() {
        let err = MapFile::from_json("{ not json").unwrap_err();
        assert!(matches!(err, NavError::NoEmbeddingTable(_)));
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_map(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, NavError::NoEmbeddingTable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn load_map_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let loaded = load_map(&path).unwrap();
        assert_eq!(loaded.graph.len(), 3);
        assert_eq!(loaded.table.dim(), 2);
        assert!(loaded.graph.is_adjacent(&"c".into(), &"b".into()));
    }
}

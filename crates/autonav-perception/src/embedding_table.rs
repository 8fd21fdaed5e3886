//! Reference embeddings per region.
//!
//! Vectors are L2-normalised on load.  A region may carry several reference
//! views; its similarity to a query is the best over its views.

use std::collections::BTreeMap;

use autonav_types::{Embedding, NavError, RegionId};
use serde::{Deserialize, Serialize};

use crate::map_file::MapFile;

/// Similarity metric between unit vectors.  Both map into `[0, 1]`-ish
/// scores where higher means more alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Dot product of unit vectors.
    #[default]
    Cosine,
    /// `1 - d / 2` where `d` is the Euclidean distance between unit vectors.
    L2,
}

#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    dim: usize,
    entries: Vec<(RegionId, Vec<f32>)>,
}

fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

impl EmbeddingTable {
    /// # Errors
    ///
    /// [`NavError::NoEmbeddingTable`] when there are no vectors at all, when
    /// dimensions disagree, or when a vector has zero or non-finite norm.
    pub fn new(
        regions: impl IntoIterator<Item = (RegionId, Vec<Embedding>)>,
    ) -> Result<Self, NavError> {
        let mut dim = None;
        let mut entries = Vec::new();
        for (region, vectors) in regions {
            for v in vectors {
                let expected = *dim.get_or_insert(v.len());
                if v.len() != expected || expected == 0 {
                    return Err(NavError::NoEmbeddingTable(format!(
                        "region {region} has a {}-d embedding, expected {expected}-d",
                        v.len()
                    )));
                }
                let unit = normalized(&v).ok_or_else(|| {
                    NavError::NoEmbeddingTable(format!("region {region} has a degenerate embedding"))
                })?;
                entries.push((region.clone(), unit));
            }
        }
        match dim {
            Some(dim) => Ok(Self { dim, entries }),
            None => Err(NavError::NoEmbeddingTable("table holds no embeddings".into())),
        }
    }

    pub fn from_map(map: &MapFile) -> Result<Self, NavError> {
        Self::new(
            map.regions
                .iter()
                .map(|(id, spec)| (id.clone(), spec.embeddings.clone())),
        )
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct regions that have at least one reference view.
    pub fn regions(&self) -> impl Iterator<Item = &RegionId> {
        let mut seen: Vec<&RegionId> = self.entries.iter().map(|(r, _)| r).collect();
        seen.sort();
        seen.dedup();
        seen.into_iter()
    }

    /// Best similarity per region for `query`.
    ///
    /// Returns `None` when the query has the wrong dimension or zero norm.
    pub fn similarities(&self, query: &[f32], metric: Metric) -> Option<BTreeMap<RegionId, f32>> {
        if query.len() != self.dim {
            return None;
        }
        let q = normalized(query)?;
        let mut best: BTreeMap<RegionId, f32> = BTreeMap::new();
        for (region, v) in &self.entries {
            let score = match metric {
                Metric::Cosine => dot(&q, v),
                Metric::L2 => {
                    let d = q
                        .iter()
                        .zip(v)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f32>()
                        .sqrt();
                    1.0 - d / 2.0
                }
            };
            best.entry(region.clone())
                .and_modify(|s| *s = s.max(score))
                .or_insert(score);
        }
        Some(best)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EmbeddingTable {
        EmbeddingTable::new([
            (RegionId::from("a"), vec![vec![2.0, 0.0], vec![0.0, 5.0]]),
            (RegionId::from("b"), vec![vec![1.0, 1.0]]),
        ])
        .unwrap()
    }

    #[test]
    fn vectors_are_normalized_and_counted() {
        let t = table();
        assert_eq!(t.dim(), 2);
        assert_eq!(t.len(), 3);
        let regions: Vec<&str> = t.regions().map(RegionId::as_str).collect();
        assert_eq!(regions, ["a", "b"]);
    }

    #[test]
    fn region_similarity_takes_best_view() {
        let sims = table().similarities(&[0.0, 3.0], Metric::Cosine).unwrap();
        assert!((sims[&RegionId::from("a")] - 1.0).abs() < 1e-6);
        assert!((sims[&RegionId::from("b")] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn l2_metric_scores_identical_vectors_as_one() {
        let sims = table().similarities(&[1.0, 1.0], Metric::L2).unwrap();
        assert!((sims[&RegionId::from("b")] - 1.0).abs() < 1e-6);
        assert!(sims[&RegionId::from("a")] < 1.0);
    }

    #[test]
    fn wrong_dimension_query_is_ignored() {
        assert!(table().similarities(&[1.0, 0.0, 0.0], Metric::Cosine).is_none());
        assert!(table().similarities(&[0.0, 0.0], Metric::Cosine).is_none());
    }

    #[test]
    fn malformed_tables_are_rejected() {
        let empty = EmbeddingTable::new(Vec::<(RegionId, Vec<Embedding>)>::new());
        assert!(matches!(empty, Err(NavError::NoEmbeddingTable(_))));

        let ragged = EmbeddingTable::new([(RegionId::from("a"), vec![vec![1.0, 0.0], vec![1.0]])]);
        assert!(matches!(ragged, Err(NavError::NoEmbeddingTable(_))));

        let zero = EmbeddingTable::new([(RegionId::from("a"), vec![vec![0.0, 0.0]])]);
        assert!(matches!(zero, Err(NavError::NoEmbeddingTable(_))));
    }
}

//! Visual place recognition against the region embedding table.
//!
//! Each call to [`Localizer::localize`] scores the live embedding against
//! every region, averages per-region scores over a short rolling window, and
//! derives confidence from the margin between the best and second-best
//! region rather than from the raw similarity:
//!
//! ```text
//! confidence = clamp((best - second) / margin_scale, 0, 1)
//! ```
//!
//! so an embedding that looks equally like two places is never trusted.
//!
//! Hysteresis: the best region is accepted only when confidence reaches
//! `low_confidence` and it is the prior region, adjacent to it, or confident
//! beyond `teleport_confidence`.  Otherwise the prior region is held with its
//! confidence multiplied by `decay`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use autonav_perception::{EmbeddingTable, Localizer, LocalizerConfig, RegionGraph};
//! use autonav_types::{Fix, Pose, RegionId};
//!
//! let graph = RegionGraph::from_parts(
//!     "a".into(),
//!     [(RegionId::from("a"), Pose::default()), (RegionId::from("b"), Pose::new(2.0, 0.0, 0.0))],
//!     &[("a".into(), "b".into(), 1.0)],
//! ).unwrap();
//! let table = EmbeddingTable::new([
//!     (RegionId::from("a"), vec![vec![1.0, 0.0]]),
//!     (RegionId::from("b"), vec![vec![0.0, 1.0]]),
//! ]).unwrap();
//!
//! let mut localizer = Localizer::new(Arc::new(graph), table, LocalizerConfig::default()).unwrap();
//! let estimate = localizer.localize(&[1.0, 0.0], None);
//! assert_eq!(estimate.region.as_str(), "a");
//! assert_eq!(estimate.fix, Fix::Locked);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use autonav_types::{Fix, NavError, PoseEstimate, RegionId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding_table::{EmbeddingTable, Metric};
use crate::region_graph::RegionGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    pub metric: Metric,
    /// Minimum confidence for a match to be accepted at all.
    pub low_confidence: f32,
    /// Confidence that allows a jump to a non-adjacent region.
    pub teleport_confidence: f32,
    /// Multiplier applied to the held confidence on a rejected/absent match.
    pub decay: f32,
    /// Best-minus-second margin that maps to full confidence.
    pub margin_scale: f32,
    /// Number of recent embeddings averaged per region.
    pub smoothing_window: usize,
    /// Ranked candidates kept for telemetry.
    pub top_k: usize,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            low_confidence: 0.35,
            teleport_confidence: 0.85,
            decay: 0.9,
            margin_scale: 0.15,
            smoothing_window: 3,
            top_k: 5,
        }
    }
}

pub struct Localizer {
    graph: Arc<RegionGraph>,
    table: EmbeddingTable,
    config: LocalizerConfig,
    history: VecDeque<BTreeMap<RegionId, f32>>,
    ranked: Vec<(RegionId, f32)>,
}

impl Localizer {
    /// # Errors
    ///
    /// [`NavError::NoEmbeddingTable`] when the table is empty or references
    /// a region the graph does not know.
    pub fn new(
        graph: Arc<RegionGraph>,
        table: EmbeddingTable,
        config: LocalizerConfig,
    ) -> Result<Self, NavError> {
        if table.is_empty() {
            return Err(NavError::NoEmbeddingTable("table holds no embeddings".into()));
        }
        if let Some(unknown) = table.regions().find(|r| !graph.contains(r)) {
            return Err(NavError::NoEmbeddingTable(format!(
                "embedding for region {unknown} which is not in the graph"
            )));
        }
        Ok(Self {
            graph,
            table,
            config,
            history: VecDeque::new(),
            ranked: Vec::new(),
        })
    }

    pub fn config(&self) -> &LocalizerConfig {
        &self.config
    }

    /// Estimate the current region from a live embedding.
    ///
    /// Never fails: an unusable embedding (wrong dimension, zero norm)
    /// degrades to [`Localizer::coast`].
    pub fn localize(&mut self, embedding: &[f32], prior: Option<&PoseEstimate>) -> PoseEstimate {
        let Some(frame) = self.table.similarities(embedding, self.config.metric) else {
            warn!(
                len = embedding.len(),
                expected = self.table.dim(),
                "unusable embedding, holding prior estimate"
            );
            return self.hold_or_start(prior, Fix::NoSignal);
        };

        let window = self.config.smoothing_window.max(1);
        self.history.push_back(frame);
        while self.history.len() > window {
            self.history.pop_front();
        }
        self.ranked = self.smoothed();

        let (best, best_score) = match self.ranked.first() {
            Some((r, s)) => (r.clone(), *s),
            None => return self.hold_or_start(prior, Fix::NoSignal),
        };
        let second_score = self.ranked.get(1).map_or(0.0, |(_, s)| *s);
        let confidence = ((best_score - second_score) / self.config.margin_scale).clamp(0.0, 1.0);

        if confidence < self.config.low_confidence {
            debug!(candidate = %best, confidence, "ambiguous match");
            return match prior {
                Some(p) => self.decayed(p, Fix::LowConfidence),
                None => Self::estimate(best, confidence, Fix::LowConfidence),
            };
        }

        match prior {
            Some(p) if p.region != best => {
                let adjacent = self.graph.is_adjacent(&p.region, &best);
                if adjacent || confidence >= self.config.teleport_confidence {
                    info!(from = %p.region, to = %best, confidence, adjacent, "region changed");
                    Self::estimate(best, confidence, Fix::Locked)
                } else {
                    warn!(
                        from = %p.region,
                        candidate = %best,
                        confidence,
                        "rejected jump to non-adjacent region"
                    );
                    self.decayed(p, Fix::JumpRejected)
                }
            }
            _ => Self::estimate(best, confidence, Fix::Locked),
        }
    }

    /// Decay `prior` when no fresh embedding is available this cycle.
    ///
    /// Also empties the smoothing window: frames from before a gap in the
    /// camera feed must not outvote the first frame after it.
    pub fn coast(&mut self, prior: &PoseEstimate) -> PoseEstimate {
        self.history.clear();
        self.ranked.clear();
        self.decayed(prior, Fix::NoSignal)
    }

    /// Ranked `(region, smoothed similarity)` from the latest localization,
    /// best first, truncated to `k`.
    pub fn top_candidates(&self, k: usize) -> Vec<(RegionId, f32)> {
        self.ranked.iter().take(k).cloned().collect()
    }

    /// The configured number of telemetry candidates.
    pub fn top_k(&self) -> Vec<(RegionId, f32)> {
        self.top_candidates(self.config.top_k)
    }

    fn smoothed(&self) -> Vec<(RegionId, f32)> {
        let mut acc: BTreeMap<&RegionId, (f32, usize)> = BTreeMap::new();
        for frame in &self.history {
            for (region, score) in frame {
                let e = acc.entry(region).or_insert((0.0, 0));
                e.0 += score;
                e.1 += 1;
            }
        }
        let mut ranked: Vec<(RegionId, f32)> = acc
            .into_iter()
            .map(|(r, (sum, n))| (r.clone(), sum / n as f32))
            .collect();
        // Highest score first; equal scores fall back to region id order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    fn decayed(&self, prior: &PoseEstimate, fix: Fix) -> PoseEstimate {
        PoseEstimate {
            region: prior.region.clone(),
            confidence: (prior.confidence * self.config.decay).clamp(0.0, 1.0),
            offset: prior.offset,
            fix,
            timestamp: Utc::now(),
        }
    }

    fn hold_or_start(&self, prior: Option<&PoseEstimate>, fix: Fix) -> PoseEstimate {
        match prior {
            Some(p) => self.decayed(p, fix),
            None => Self::estimate(self.graph.start().clone(), 0.0, fix),
        }
    }

    fn estimate(region: RegionId, confidence: f32, fix: Fix) -> PoseEstimate {
        PoseEstimate {
            region,
            confidence,
            offset: None,
            fix,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use autonav_types::Pose;

    use super::*;

    // ------------------------------------------------------------------
    // Fixtures: chain a - b - c, plus d reachable only through c.
    // ------------------------------------------------------------------

    fn graph() -> Arc<RegionGraph> {
        let anchors = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, s)| (RegionId::from(*s), Pose::new(2.0 * i as f32, 0.0, 0.0)));
        let edges = [
            (RegionId::from("a"), RegionId::from("b"), 1.0),
            (RegionId::from("b"), RegionId::from("c"), 1.0),
            (RegionId::from("c"), RegionId::from("d"), 1.0),
        ];
        Arc::new(RegionGraph::from_parts("a".into(), anchors, &edges).unwrap())
    }

    fn one_hot(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 4];
        v[i] = 1.0;
        v
    }

    fn table() -> EmbeddingTable {
        EmbeddingTable::new(
            ["a", "b", "c", "d"]
                .iter()
                .enumerate()
                .map(|(i, s)| (RegionId::from(*s), vec![one_hot(i)])),
        )
        .unwrap()
    }

    fn localizer(window: usize) -> Localizer {
        let config = LocalizerConfig {
            smoothing_window: window,
            ..LocalizerConfig::default()
        };
        Localizer::new(graph(), table(), config).unwrap()
    }

    fn locked(region: &str, confidence: f32) -> PoseEstimate {
        PoseEstimate {
            region: region.into(),
            confidence,
            offset: None,
            fix: Fix::Locked,
            timestamp: Utc::now(),
        }
    }

    // ------------------------------------------------------------------

    #[test]
    fn clear_match_is_locked_with_full_confidence() {
        let mut loc = localizer(1);
        let est = loc.localize(&one_hot(1), Some(&locked("a", 0.9)));
        assert_eq!(est.region.as_str(), "b");
        assert_eq!(est.fix, Fix::Locked);
        assert!((est.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ambiguous_embedding_falls_below_low_threshold() {
        let mut loc = localizer(1);
        // Nearly equidistant between a and b.
        let est = loc.localize(&[1.0, 0.98, 0.0, 0.0], None);
        assert!(est.confidence < loc.config().low_confidence);
        assert_eq!(est.fix, Fix::LowConfidence);
    }

    #[test]
    fn ambiguous_embedding_holds_prior_with_decay() {
        let mut loc = localizer(1);
        let prior = locked("c", 0.8);
        let est = loc.localize(&[1.0, 0.98, 0.0, 0.0], Some(&prior));
        assert_eq!(est.region.as_str(), "c");
        assert!((est.confidence - 0.72).abs() < 1e-6);
    }

    #[test]
    fn non_adjacent_jump_below_teleport_is_rejected() {
        let mut loc = localizer(1);
        // Unambiguous d is a legitimate teleport.
        let est = loc.localize(&[0.0, 0.0, 0.0, 1.0], Some(&locked("a", 0.9)));
        assert_eq!(est.region.as_str(), "d");

        // d still wins, but the margin lands between low and teleport.
        let mut loc = localizer(1);
        let est = loc.localize(&[0.0, 0.0, 0.9, 1.0], Some(&locked("a", 0.9)));
        assert_eq!(est.region.as_str(), "a");
        assert_eq!(est.fix, Fix::JumpRejected);
        assert!(est.confidence < 0.9);
    }

    #[test]
    fn adjacent_move_below_teleport_is_accepted() {
        let mut loc = localizer(1);
        let est = loc.localize(&[0.0, 0.9, 1.0, 0.0], Some(&locked("b", 0.9)));
        assert_eq!(est.region.as_str(), "c");
        assert_eq!(est.fix, Fix::Locked);
        assert!(est.confidence < loc.config().teleport_confidence);
    }

    #[test]
    fn smoothing_delays_region_switch() {
        let mut loc = localizer(3);
        let mut prior = loc.localize(&one_hot(0), None);
        prior = loc.localize(&one_hot(0), Some(&prior));
        prior = loc.localize(&one_hot(0), Some(&prior));
        assert_eq!(prior.region.as_str(), "a");

        prior = loc.localize(&one_hot(1), Some(&prior));
        assert_eq!(prior.region.as_str(), "a", "one frame must not flip the estimate");
        prior = loc.localize(&one_hot(1), Some(&prior));
        assert_eq!(prior.region.as_str(), "b");
    }

    #[test]
    fn coast_and_bad_dimension_decay_prior() {
        let mut loc = localizer(3);
        let prior = locked("b", 0.5);
        let coasted = loc.coast(&prior);
        assert_eq!(coasted.fix, Fix::NoSignal);
        assert!((coasted.confidence - 0.45).abs() < 1e-6);

        let est = loc.localize(&[1.0, 0.0], Some(&prior));
        assert_eq!(est.region.as_str(), "b");
        assert_eq!(est.fix, Fix::NoSignal);
    }

    #[test]
    fn reacquisition_after_coasting_uses_only_new_frames() {
        let mut loc = localizer(3);
        let mut prior = loc.localize(&one_hot(0), None);
        prior = loc.localize(&one_hot(0), Some(&prior));
        prior = loc.localize(&one_hot(0), Some(&prior));
        assert_eq!(prior.region.as_str(), "a");

        for _ in 0..5 {
            prior = loc.coast(&prior);
        }
        assert!(loc.top_k().is_empty());

        let est = loc.localize(&one_hot(1), Some(&prior));
        assert_eq!(est.region.as_str(), "b");
        assert_eq!(est.fix, Fix::Locked);
        assert_eq!(loc.top_k()[0].0.as_str(), "b");
    }

    #[test]
    fn top_candidates_are_ranked() {
        let mut loc = localizer(1);
        loc.localize(&[0.1, 0.2, 1.0, 0.0], None);
        let top = loc.top_candidates(3);
        let names: Vec<&str> = top.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(names, ["c", "b", "a"]);
    }

    #[test]
    fn table_with_unknown_region_is_rejected() {
        let table = EmbeddingTable::new([(RegionId::from("zz"), vec![vec![1.0, 0.0]])]).unwrap();
        let err = Localizer::new(graph(), table, LocalizerConfig::default()).err().unwrap();
        assert!(matches!(err, NavError::NoEmbeddingTable(_)));
    }
}

//! [`RegionGraph`] – the static building graph.
//!
//! Built once from a [`MapFile`] and never mutated, so it can be shared
//! freely behind an `Arc`.  Construction enforces:
//!
//! - the start region exists;
//! - every neighbor reference names a known region (no dangling edges);
//! - traversal costs are finite and strictly positive;
//! - every region is reachable from the start region.
//!
//! Adjacency is undirected.  A declared edge is mirrored, and when both
//! directions are declared the lower cost wins.  Neighbor lists are ordered
//! by region id so iteration is deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use autonav_types::{NavError, Pose, RegionId};
use tracing::debug;

use crate::map_file::MapFile;

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub anchor: Pose,
    /// `(neighbor, traversal cost)`, sorted by neighbor id.
    pub neighbors: Vec<(RegionId, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionGraph {
    start: RegionId,
    regions: BTreeMap<RegionId, Region>,
}

impl RegionGraph {
    /// Validate the adjacency structure of a map document.
    pub fn load(map: &MapFile) -> Result<Self, NavError> {
        let anchors = map
            .regions
            .iter()
            .map(|(id, region)| (id.clone(), region.anchor));
        let edges: Vec<(RegionId, RegionId, f32)> = map
            .regions
            .iter()
            .flat_map(|(id, region)| {
                region
                    .neighbors
                    .iter()
                    .map(move |n| (id.clone(), n.id().clone(), n.cost()))
            })
            .collect();
        Self::from_parts(map.start.clone(), anchors, &edges)
    }

    /// Build from explicit anchors and `(from, to, cost)` edges.
    pub fn from_parts(
        start: RegionId,
        anchors: impl IntoIterator<Item = (RegionId, Pose)>,
        edges: &[(RegionId, RegionId, f32)],
    ) -> Result<Self, NavError> {
        let mut adjacency: BTreeMap<RegionId, BTreeMap<RegionId, f32>> = BTreeMap::new();
        let mut poses: BTreeMap<RegionId, Pose> = BTreeMap::new();
        for (id, anchor) in anchors {
            adjacency.entry(id.clone()).or_default();
            poses.insert(id, anchor);
        }

        if poses.is_empty() {
            return Err(NavError::InvalidGraph("map declares no regions".into()));
        }
        if !poses.contains_key(&start) {
            return Err(NavError::InvalidGraph(format!(
                "start region {start} is not declared"
            )));
        }

        for (from, to, cost) in edges {
            if !poses.contains_key(to) {
                return Err(NavError::InvalidGraph(format!(
                    "region {from} lists unknown neighbor {to}"
                )));
            }
            if !poses.contains_key(from) {
                return Err(NavError::InvalidGraph(format!(
                    "edge references unknown region {from}"
                )));
            }
            if from == to {
                return Err(NavError::InvalidGraph(format!(
                    "region {from} lists itself as a neighbor"
                )));
            }
            if !cost.is_finite() || *cost <= 0.0 {
                return Err(NavError::InvalidGraph(format!(
                    "edge {from} -> {to} has invalid cost {cost}"
                )));
            }
            for (a, b) in [(from, to), (to, from)] {
                let slot = adjacency
                    .entry(a.clone())
                    .or_default()
                    .entry(b.clone())
                    .or_insert(*cost);
                *slot = slot.min(*cost);
            }
        }

        let regions: BTreeMap<RegionId, Region> = poses
            .into_iter()
            .map(|(id, anchor)| {
                let neighbors = adjacency
                    .remove(&id)
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                let region = Region {
                    id: id.clone(),
                    anchor,
                    neighbors,
                };
                (id, region)
            })
            .collect();

        let graph = Self { start, regions };
        graph.check_connected()?;
        debug!(regions = graph.len(), start = %graph.start, "region graph validated");
        Ok(graph)
    }

    fn check_connected(&self) -> Result<(), NavError> {
        let mut seen: BTreeSet<&RegionId> = BTreeSet::from([&self.start]);
        let mut queue = VecDeque::from([&self.start]);
        while let Some(id) = queue.pop_front() {
            for (n, _) in &self.regions[id].neighbors {
                if seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        match self.regions.keys().find(|id| !seen.contains(id)) {
            Some(orphan) => Err(NavError::InvalidGraph(format!(
                "region {orphan} is not reachable from start region {}",
                self.start
            ))),
            None => Ok(()),
        }
    }

    pub fn start(&self) -> &RegionId {
        &self.start
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn contains(&self, id: &RegionId) -> bool {
        self.regions.contains_key(id)
    }

    /// Region ids in ascending order.
    pub fn region_ids(&self) -> impl Iterator<Item = &RegionId> {
        self.regions.keys()
    }

    pub fn region(&self, id: &RegionId) -> Result<&Region, NavError> {
        self.regions
            .get(id)
            .ok_or_else(|| NavError::UnknownRegion(id.clone()))
    }

    /// Neighbors of `id` with traversal cost, ordered by neighbor id.
    pub fn neighbors_of(&self, id: &RegionId) -> Result<&[(RegionId, f32)], NavError> {
        self.region(id).map(|r| r.neighbors.as_slice())
    }

    pub fn anchor_of(&self, id: &RegionId) -> Result<Pose, NavError> {
        self.region(id).map(|r| r.anchor)
    }

    pub fn is_adjacent(&self, a: &RegionId, b: &RegionId) -> bool {
        self.regions
            .get(a)
            .is_some_and(|r| r.neighbors.iter().any(|(n, _)| n == b))
    }
}

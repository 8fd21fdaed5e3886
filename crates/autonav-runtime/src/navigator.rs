//! [`Navigator`] – shortest-path routing over the region graph.
//!
//! Plans are computed with Dijkstra over traversal costs.  The frontier is
//! ordered by `(cost, region id)` and equal-cost predecessors resolve to the
//! lowest region id, so the same inputs always produce the same plan.
//!
//! The navigator keeps one active plan and replans only when the goal
//! changes or the localizer places the platform somewhere that is not on the
//! remaining part of that plan.  Ordinary progress along the plan just
//! advances [`NavigationPlan::progress`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use autonav_perception::RegionGraph;
//! use autonav_runtime::navigator::{Guidance, Navigator};
//! use autonav_types::{Pose, RegionId};
//!
//! let anchors = [("a", 0.0), ("b", 2.0), ("c", 4.0)]
//!     .map(|(id, x)| (RegionId::from(id), Pose::new(x, 0.0, 0.0)));
//! let edges = [
//!     (RegionId::from("a"), RegionId::from("b"), 1.0),
//!     (RegionId::from("b"), RegionId::from("c"), 1.0),
//! ];
//! let graph = Arc::new(RegionGraph::from_parts("a".into(), anchors, &edges).unwrap());
//!
//! let mut nav = Navigator::new(graph);
//! let guidance = nav.update(&"a".into(), &"c".into()).unwrap();
//! assert!(matches!(guidance, Guidance::Navigating { ref next, .. } if next.as_str() == "b"));
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use autonav_perception::RegionGraph;
use autonav_types::{NavError, Pose, RegionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// NavigationPlan
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered regions from the planning origin to the goal, plus how far along
/// the platform currently is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationPlan {
    regions: Vec<RegionId>,
    progress: usize,
}

impl NavigationPlan {
    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }

    /// Index of the current region within [`NavigationPlan::regions`].
    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn goal(&self) -> Option<&RegionId> {
        self.regions.last()
    }

    /// Regions not yet left behind, current region first.
    pub fn remaining(&self) -> &[RegionId] {
        &self.regions[self.progress.min(self.regions.len())..]
    }

    /// Absolute index of `region` within the remaining plan.
    pub fn position_of(&self, region: &RegionId) -> Option<usize> {
        self.remaining()
            .iter()
            .position(|r| r == region)
            .map(|i| i + self.progress)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guidance
// ─────────────────────────────────────────────────────────────────────────────

/// What the policy should steer toward this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guidance {
    /// No goal set.
    Idle,
    Navigating {
        next: RegionId,
        subgoal: Pose,
        /// Bearing from the current region's anchor to `subgoal`.
        bearing_rad: f32,
    },
    GoalReached { subgoal: Pose },
}

impl Guidance {
    pub fn subgoal(&self) -> Option<Pose> {
        match self {
            Guidance::Idle => None,
            Guidance::Navigating { subgoal, .. } | Guidance::GoalReached { subgoal } => Some(*subgoal),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dijkstra frontier
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct Frontier {
    cost: f32,
    region: RegionId,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.region.cmp(&self.region))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Costs closer than this are treated as equal when breaking ties.
const COST_EPSILON: f32 = 1e-5;

// ─────────────────────────────────────────────────────────────────────────────
// Navigator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Navigator {
    graph: Arc<RegionGraph>,
    active: Option<NavigationPlan>,
    replans: u64,
}

impl Navigator {
    pub fn new(graph: Arc<RegionGraph>) -> Self {
        Self {
            graph,
            active: None,
            replans: 0,
        }
    }

    /// Shortest path from `current` to `goal`.
    ///
    /// # Errors
    ///
    /// - [`NavError::UnknownRegion`] if either endpoint is not in the graph.
    /// - [`NavError::Unreachable`] if no path connects them.
    pub fn plan(&self, current: &RegionId, goal: &RegionId) -> Result<NavigationPlan, NavError> {
        for id in [current, goal] {
            if !self.graph.contains(id) {
                return Err(NavError::UnknownRegion(id.clone()));
            }
        }

        let mut dist: BTreeMap<RegionId, f32> = BTreeMap::new();
        let mut prev: BTreeMap<RegionId, RegionId> = BTreeMap::new();
        let mut heap = BinaryHeap::new();
        dist.insert(current.clone(), 0.0);
        heap.push(Frontier {
            cost: 0.0,
            region: current.clone(),
        });

        while let Some(Frontier { cost, region }) = heap.pop() {
            if &region == goal {
                break;
            }
            if dist.get(&region).is_some_and(|&d| cost > d) {
                continue;
            }
            for (neighbor, edge_cost) in self.graph.neighbors_of(&region)? {
                let candidate = cost + edge_cost;
                let better = match dist.get(neighbor) {
                    None => true,
                    Some(&known) if candidate < known - COST_EPSILON => true,
                    Some(&known) if (candidate - known).abs() <= COST_EPSILON => {
                        prev.get(neighbor).is_some_and(|p| region < *p)
                    }
                    Some(_) => false,
                };
                if better {
                    dist.insert(neighbor.clone(), candidate);
                    prev.insert(neighbor.clone(), region.clone());
                    heap.push(Frontier {
                        cost: candidate,
                        region: neighbor.clone(),
                    });
                }
            }
        }

        if !dist.contains_key(goal) {
            return Err(NavError::Unreachable {
                from: current.clone(),
                to: goal.clone(),
            });
        }

        let mut regions = vec![goal.clone()];
        let mut cursor = goal;
        while let Some(p) = prev.get(cursor) {
            regions.push(p.clone());
            cursor = p;
        }
        regions.reverse();
        Ok(NavigationPlan { regions, progress: 0 })
    }

    /// Anchor of the region after `current` in `plan`, or the goal anchor on
    /// the last hop.  When `current` is not on the remaining plan the first
    /// remaining region is targeted.
    pub fn next_subgoal(&self, plan: &NavigationPlan, current: &RegionId) -> Result<Pose, NavError> {
        let target = match plan.position_of(current) {
            Some(i) => plan.regions.get(i + 1).or(plan.goal()),
            None => plan.remaining().first(),
        };
        let target = target.ok_or_else(|| NavError::UnknownRegion(current.clone()))?;
        self.graph.anchor_of(target)
    }

    /// Advance, or replan when needed, and produce this cycle's guidance.
    pub fn update(&mut self, current: &RegionId, goal: &RegionId) -> Result<Guidance, NavError> {
        let keep = self
            .active
            .as_ref()
            .is_some_and(|p| p.goal() == Some(goal) && p.position_of(current).is_some());

        if keep {
            if let Some(plan) = self.active.as_mut()
                && let Some(i) = plan.position_of(current)
                && i != plan.progress
            {
                debug!(region = %current, progress = i, "plan advanced");
                plan.progress = i;
            }
        } else {
            let same_goal = self.active.as_ref().and_then(|p| p.goal()) == Some(goal);
            let plan = self.plan(current, goal)?;
            if same_goal {
                self.replans += 1;
                info!(from = %current, goal = %goal, hops = plan.len() - 1, replans = self.replans, "replanned off-path");
            } else {
                info!(from = %current, goal = %goal, hops = plan.len() - 1, "plan computed");
            }
            self.active = Some(plan);
        }

        let Some(plan) = self.active.as_ref() else {
            return Ok(Guidance::Idle);
        };
        if current == goal {
            return Ok(Guidance::GoalReached {
                subgoal: self.graph.anchor_of(goal)?,
            });
        }
        let next = plan
            .regions
            .get(plan.progress + 1)
            .cloned()
            .unwrap_or_else(|| goal.clone());
        let subgoal = self.next_subgoal(plan, current)?;
        let bearing_rad = self.graph.anchor_of(current)?.bearing_to(&subgoal);
        Ok(Guidance::Navigating {
            next,
            subgoal,
            bearing_rad,
        })
    }

    pub fn active_plan(&self) -> Option<&NavigationPlan> {
        self.active.as_ref()
    }

    /// Plans recomputed for an unchanged goal.
    pub fn replans(&self) -> u64 {
        self.replans
    }

    /// Drop the active plan (goal cleared or mission stopped).
    pub fn clear(&mut self) {
        self.active = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! [`MlpPolicy`] – learned driver backed by a small dense network.
//!
//! # Model file
//!
//! ```json
//! {
//!   "input_dim": 36,
//!   "layers": [
//!     { "weights": [[0.1, ...], ...], "bias": [0.0, ...] },
//!     { "weights": [[...], [...]],     "bias": [0.0, 0.0] }
//!   ]
//! }
//! ```
//!
//! `weights` is row-major `[out][in]`.  Every layer but the last is followed
//! by an ELU; the last layer must be two wide and is read as
//! `[throttle, steering]`, each clamped to `[-1, 1]`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use autonav_types::{ControlAction, NavError, RawAction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::policy::{Observation, Policy};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cannot read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed model file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("inconsistent model shape: {0}")]
    Shape(String),
}

impl From<ModelError> for NavError {
    fn from(e: ModelError) -> Self {
        NavError::ModelLoadError(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl DenseLayer {
    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    pub input_dim: usize,
    pub layers: Vec<DenseLayer>,
}

impl MlpModel {
    /// Check that consecutive layers line up and the head is two wide.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::Shape("model has no layers".into()));
        }
        let mut width = self.input_dim;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() || layer.weights.len() != layer.bias.len() {
                return Err(ModelError::Shape(format!(
                    "layer {i}: {} weight rows for {} biases",
                    layer.weights.len(),
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().find(|row| row.len() != width) {
                return Err(ModelError::Shape(format!(
                    "layer {i}: expected {width} inputs, found a row of {}",
                    row.len()
                )));
            }
            width = layer.bias.len();
        }
        if width != 2 {
            return Err(ModelError::Shape(format!("output width is {width}, expected 2")));
        }
        Ok(())
    }

    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        let last = self.layers.len().saturating_sub(1);
        self.layers
            .iter()
            .enumerate()
            .fold(input.to_vec(), |x, (i, layer)| {
                let y = layer.forward(&x);
                if i < last { y.into_iter().map(elu).collect() } else { y }
            })
    }
}

fn elu(x: f32) -> f32 {
    if x > 0.0 { x } else { x.exp_m1() }
}

pub struct MlpPolicy {
    name: String,
    model: Arc<MlpModel>,
}

impl MlpPolicy {
    pub fn new(name: impl Into<String>, model: MlpModel) -> Result<Self, ModelError> {
        model.validate()?;
        Ok(Self {
            name: name.into(),
            model: Arc::new(model),
        })
    }

    /// Load and validate a JSON model file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        let model: MlpModel = serde_json::from_str(&text)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mlp".to_string());
        let policy = Self::new(name, model)?;
        info!(
            path = %path.display(),
            input_dim = policy.model.input_dim,
            layers = policy.model.layers.len(),
            "policy model loaded"
        );
        Ok(policy)
    }

    pub fn input_dim(&self) -> usize {
        self.model.input_dim
    }
}

#[async_trait]
impl Policy for MlpPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, observation: &Observation) -> Result<RawAction, NavError> {
        let features = observation.features();
        if features.len() != self.model.input_dim {
            return Err(NavError::PolicyUnavailable(format!(
                "model {} expects {} inputs, observation has {}",
                self.name,
                self.model.input_dim,
                features.len()
            )));
        }
        // The forward pass runs on the blocking pool so the adapter's budget
        // can still fire while it computes.
        let model = Arc::clone(&self.model);
        let out = tokio::task::spawn_blocking(move || model.forward(&features))
            .await
            .map_err(|e| NavError::PolicyUnavailable(format!("model {} forward pass: {e}", self.name)))?;
        let action = ControlAction::new(out[0], out[1]).clamped();
        Ok(RawAction(action))
    }
}

#[cfg(test)]
mod tests {
    use autonav_types::{Orientation, Pose, PoseEstimate, RangeScan};

    use super::*;
    use crate::navigator::Guidance;

    fn observation(sectors: usize) -> Observation {
        let angles: Vec<f32> = (0..sectors).map(|i| i as f32 * 0.1).collect();
        Observation {
            scan: RangeScan::uniform(&angles, 0.9, 12.0),
            orientation: Orientation::default(),
            estimate: PoseEstimate::seeded("a".into()),
            guidance: Guidance::Navigating {
                next: "b".into(),
                subgoal: Pose::new(1.0, 0.0, 0.0),
                bearing_rad: 0.0,
            },
            heading_error_rad: 0.0,
            last_action: ControlAction::zero(),
        }
    }

    /// Hidden layer copies the first reciprocal-range feature; the head maps
    /// it to throttle and a constant steering bias.
    fn model(input_dim: usize) -> MlpModel {
        let mut pick = vec![0.0; input_dim];
        pick[2] = 1.0;
        MlpModel {
            input_dim,
            layers: vec![
                DenseLayer {
                    weights: vec![pick],
                    bias: vec![-2.0],
                },
                DenseLayer {
                    weights: vec![vec![-1.0], vec![0.0]],
                    bias: vec![0.0, 5.0],
                },
            ],
        }
    }

    #[test]
    fn elu_is_identity_above_zero() {
        assert_eq!(elu(1.5), 1.5);
        assert!((elu(-1.0) - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn forward_pass_applies_elu_and_clamps_head() {
        let policy = MlpPolicy::new("test", model(12)).unwrap();
        let RawAction(a) = policy.infer(&observation(4)).await.unwrap();
        // hidden = elu(1/(0.1+0.9) - 2) = elu(-1); throttle = -hidden.
        let expected = 1.0 - (-1.0f32).exp();
        assert!((a.linear_velocity - expected).abs() < 1e-5);
        assert_eq!(a.angular_velocity, 1.0);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_unavailable() {
        let policy = MlpPolicy::new("test", model(12)).unwrap();
        let err = policy.infer(&observation(28)).await.unwrap_err();
        assert!(matches!(err, NavError::PolicyUnavailable(_)));
    }

    #[test]
    fn bad_shapes_are_rejected() {
        let mut m = model(12);
        m.layers[1].bias.pop();
        assert!(matches!(MlpPolicy::new("x", m), Err(ModelError::Shape(_))));

        let mut m = model(12);
        m.input_dim = 10;
        assert!(MlpPolicy::new("x", m).is_err());

        let mut m = model(12);
        m.layers.pop();
        assert!(MlpPolicy::new("x", m).is_err());
    }

    #[test]
    fn load_reads_json_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.json");
        std::fs::write(&path, serde_json::to_string(&model(36)).unwrap()).unwrap();
        let policy = MlpPolicy::load(&path).unwrap();
        assert_eq!(policy.name(), "driver");
        assert_eq!(policy.input_dim(), 36);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(MlpPolicy::load(&path), Err(ModelError::Json(_))));
    }
}

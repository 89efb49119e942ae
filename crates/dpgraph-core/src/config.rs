//! Privacy configuration shared by the publish engine and the sensitivity search.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest accepted `sensitivity_vertex_limit`; the search visits `2^limit` vertices.
pub const MAX_VERTEX_LIMIT: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Default Gaussian noise multiplier used when a publish request omits one.
    pub sigma: f64,

    /// The δ of (ε, δ)-differential privacy; enters the per-subject ε charge.
    pub delta: f64,

    /// Optional seed for the noise and sensitivity-search RNGs. `None` draws from entropy.
    pub seed: Option<u64>,

    /// Upper bound on drop-and-retry rounds inside one publish call.
    pub max_publish_retries: usize,

    /// Uniform random interior points evaluated by the sensitivity search.
    pub sensitivity_samples: usize,

    /// Box dimension above which only a random subset of vertices is sampled.
    pub sensitivity_vertex_limit: usize,

    /// Projected-ascent iterations per refinement start.
    pub sensitivity_refine_steps: usize,

    /// How many of the best candidates are refined.
    pub sensitivity_refine_starts: usize,

    /// Relative step of the finite-difference refinement (fraction of box width).
    pub sensitivity_step: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            delta: 1e-5,
            seed: None,
            max_publish_retries: 64,
            sensitivity_samples: 64,
            sensitivity_vertex_limit: 10,
            sensitivity_refine_steps: 32,
            sensitivity_refine_starts: 4,
            sensitivity_step: 0.05,
        }
    }
}

impl PrivacyConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `DPGRAPH_SIGMA`: default noise multiplier
    /// - `DPGRAPH_DELTA`: δ
    /// - `DPGRAPH_SEED`: RNG seed
    /// - `DPGRAPH_MAX_PUBLISH_RETRIES`: retry cap per publish
    /// - `DPGRAPH_SENSITIVITY_SAMPLES`: random interior samples
    /// - `DPGRAPH_SENSITIVITY_VERTEX_LIMIT`: full-vertex enumeration cutoff
    /// - `DPGRAPH_SENSITIVITY_REFINE_STEPS`: refinement iterations
    /// - `DPGRAPH_SENSITIVITY_REFINE_STARTS`: refinement starts
    /// - `DPGRAPH_SENSITIVITY_STEP`: refinement step fraction
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<f64>("DPGRAPH_SIGMA") {
            cfg.sigma = v;
        }
        if let Some(v) = env_parse::<f64>("DPGRAPH_DELTA") {
            cfg.delta = v;
        }
        if let Some(v) = env_parse::<u64>("DPGRAPH_SEED") {
            cfg.seed = Some(v);
        }
        if let Some(v) = env_parse::<usize>("DPGRAPH_MAX_PUBLISH_RETRIES") {
            cfg.max_publish_retries = v;
        }
        if let Some(v) = env_parse::<usize>("DPGRAPH_SENSITIVITY_SAMPLES") {
            cfg.sensitivity_samples = v;
        }
        if let Some(v) = env_parse::<usize>("DPGRAPH_SENSITIVITY_VERTEX_LIMIT") {
            cfg.sensitivity_vertex_limit = v;
        }
        if let Some(v) = env_parse::<usize>("DPGRAPH_SENSITIVITY_REFINE_STEPS") {
            cfg.sensitivity_refine_steps = v;
        }
        if let Some(v) = env_parse::<usize>("DPGRAPH_SENSITIVITY_REFINE_STARTS") {
            cfg.sensitivity_refine_starts = v;
        }
        if let Some(v) = env_parse::<f64>("DPGRAPH_SENSITIVITY_STEP") {
            cfg.sensitivity_step = v;
        }

        cfg
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(Error::Config(format!("sigma must be positive, got {}", self.sigma)));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(Error::Config(format!("delta must lie in (0, 1), got {}", self.delta)));
        }
        if self.sensitivity_vertex_limit > MAX_VERTEX_LIMIT {
            return Err(Error::Config(format!(
                "sensitivity_vertex_limit must be at most {MAX_VERTEX_LIMIT}, got {}",
                self.sensitivity_vertex_limit
            )));
        }
        if !(self.sensitivity_step > 0.0 && self.sensitivity_step <= 1.0) {
            return Err(Error::Config(format!(
                "sensitivity_step must lie in (0, 1], got {}",
                self.sensitivity_step
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

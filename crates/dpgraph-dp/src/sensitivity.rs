//! Lipschitz-constant search for non-linear nodes.
//!
//! The bound is `max |∂ sum(f) / ∂ x|` over the box formed by every source's
//! value bounds. The search is heuristic: it evaluates the gradient on box
//! vertices, the centroid, vertex-centroid midpoints and uniform interior
//! samples, then refines the best few points by projected ascent with
//! central finite differences. It may under-estimate for highly oscillatory
//! functions.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use dpgraph_core::config::{PrivacyConfig, MAX_VERTEX_LIMIT};
use dpgraph_core::id::NodeId;
use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::Tensor;
use dpgraph_lazy::{gradient_of_sum, Expr, LazyNode, SourceState};

use crate::error::{PublishError, Result};

/// Smallest ascent step before a refinement start gives up.
const MIN_STEP: f64 = 1e-6;

/// One source flattened into the search vector.
struct Slot {
    id: NodeId,
    shape: Shape,
    offset: usize,
    len: usize,
}

/// The search box: every non-empty source laid end to end.
struct SearchBox {
    slots: Vec<Slot>,
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl SearchBox {
    fn new(state: &SourceState) -> Result<Self> {
        let mut slots = Vec::new();
        let (mut lo, mut hi) = (Vec::new(), Vec::new());
        for (id, node) in state {
            let len = node.shape().numel();
            if len == 0 {
                continue;
            }
            let bounds = node.bounds();
            if !bounds.is_finite() {
                return Err(PublishError::UnboundedSource(*id));
            }
            let shape = node.shape().clone();
            let min = bounds.min.to_tensor()?.broadcast_to(&shape)?;
            let max = bounds.max.to_tensor()?.broadcast_to(&shape)?;
            slots.push(Slot {
                id: *id,
                shape,
                offset: lo.len(),
                len,
            });
            lo.extend_from_slice(min.data());
            hi.extend_from_slice(max.data());
        }
        Ok(Self { slots, lo, hi })
    }

    fn dim(&self) -> usize {
        self.lo.len()
    }

    fn centroid(&self) -> Vec<f64> {
        self.lo.iter().zip(&self.hi).map(|(l, h)| 0.5 * (l + h)).collect()
    }

    fn vertex(&self, mut pick_hi: impl FnMut(usize) -> bool) -> Vec<f64> {
        (0..self.dim())
            .map(|i| if pick_hi(i) { self.hi[i] } else { self.lo[i] })
            .collect()
    }

    fn clamp(&self, i: usize, v: f64) -> f64 {
        v.max(self.lo[i]).min(self.hi[i])
    }
}

/// Gradient-magnitude objective evaluated at points of a [`SearchBox`].
struct Objective<'a> {
    expr: &'a Expr,
    state: &'a SourceState,
    search: &'a SearchBox,
    evaluations: usize,
}

impl Objective<'_> {
    fn at(&mut self, x: &[f64]) -> Result<f64> {
        self.evaluations += 1;
        let mut state = self.state.clone();
        for slot in &self.search.slots {
            let values = x[slot.offset..slot.offset + slot.len].to_vec();
            state.substitute(slot.id, Tensor::new(slot.shape.clone(), values)?)?;
        }
        let grads = gradient_of_sum(self.expr, &state)?;
        let mut best = 0.0f64;
        for slot in &self.search.slots {
            if let Some(g) = grads.get(&slot.id) {
                let m = g.max_abs();
                if m.is_nan() {
                    return Ok(f64::INFINITY);
                }
                best = best.max(m);
            }
        }
        Ok(best)
    }
}

#[derive(Debug, Clone)]
pub struct SensitivityEstimator {
    samples: usize,
    vertex_limit: usize,
    refine_steps: usize,
    refine_starts: usize,
    step: f64,
    seed: Option<u64>,
}

impl Default for SensitivityEstimator {
    fn default() -> Self {
        Self::new(&PrivacyConfig::default())
    }
}

impl SensitivityEstimator {
    pub fn new(config: &PrivacyConfig) -> Self {
        Self {
            samples: config.sensitivity_samples,
            vertex_limit: config.sensitivity_vertex_limit.min(MAX_VERTEX_LIMIT),
            refine_steps: config.sensitivity_refine_steps,
            refine_starts: config.sensitivity_refine_starts,
            step: config.sensitivity_step,
            seed: config.seed,
        }
    }

    /// Sensitivity used to scale noise for `node`: exactly 1 for linear
    /// nodes, otherwise the searched Lipschitz bound.
    pub fn estimate(&self, node: &LazyNode) -> Result<f64> {
        if node.is_linear() {
            return Ok(1.0);
        }
        self.lipschitz_bound(node.expr(), node.sources())
    }

    /// `max |∂ sum(expr) / ∂ source|` over the bounds box of `state`.
    ///
    /// Fails with [`PublishError::UnboundedSensitivity`] when the gradient
    /// blows up anywhere in the box (`sqrt` or `log` at 0, for instance).
    pub fn lipschitz_bound(&self, expr: &Expr, state: &SourceState) -> Result<f64> {
        let bound = self.search(expr, state)?;
        if !bound.is_finite() {
            return Err(PublishError::UnboundedSensitivity(bound));
        }
        Ok(bound)
    }

    fn search(&self, expr: &Expr, state: &SourceState) -> Result<f64> {
        let search = SearchBox::new(state)?;
        let mut objective = Objective {
            expr,
            state,
            search: &search,
            evaluations: 0,
        };
        if search.dim() == 0 {
            return objective.at(&[]);
        }

        let mut rng = match self.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };

        let mut scored: Vec<(f64, Vec<f64>)> = Vec::new();
        for x in self.candidates(&search, &mut rng) {
            let f = objective.at(&x)?;
            if f.is_infinite() {
                return Ok(f);
            }
            scored.push((f, x));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut best = scored.first().map(|(f, _)| *f).unwrap_or(0.0);
        for (f, x) in scored.into_iter().take(self.refine_starts) {
            let refined = self.refine(&mut objective, x, f)?;
            best = best.max(refined);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            dim = search.dim(),
            evaluations = objective.evaluations,
            bound = best,
            "sensitivity search finished"
        );
        Ok(best)
    }

    fn candidates(&self, search: &SearchBox, rng: &mut ChaCha20Rng) -> Vec<Vec<f64>> {
        let d = search.dim();
        let full = 1usize.checked_shl(d as u32).filter(|_| d <= self.vertex_limit);
        let vertices: Vec<Vec<f64>> = match full {
            Some(count) => (0..count)
                .map(|mask| search.vertex(|i| mask & (1 << i) != 0))
                .collect(),
            None => {
                let count = 1usize.checked_shl(self.vertex_limit as u32).unwrap_or(0);
                (0..count)
                    .map(|_| search.vertex(|_| rng.gen_bool(0.5)))
                    .collect()
            }
        };

        let centroid = search.centroid();
        let mut out = Vec::with_capacity(2 * vertices.len() + self.samples + 1);
        for v in &vertices {
            out.push(v.iter().zip(&centroid).map(|(a, c)| 0.5 * (a + c)).collect());
        }
        out.extend(vertices);
        out.push(centroid);
        for _ in 0..self.samples {
            out.push(
                (0..d)
                    .map(|i| search.lo[i] + rng.gen::<f64>() * (search.hi[i] - search.lo[i]))
                    .collect(),
            );
        }
        out
    }

    /// Sign-of-gradient ascent inside the box, halving the step on failure.
    fn refine(&self, objective: &mut Objective<'_>, mut x: Vec<f64>, mut fx: f64) -> Result<f64> {
        let search = objective.search;
        let widths: Vec<f64> = search.lo.iter().zip(&search.hi).map(|(l, h)| h - l).collect();
        let mut step = self.step;

        for _ in 0..self.refine_steps {
            if step < MIN_STEP {
                break;
            }
            let mut direction = vec![0.0; x.len()];
            for i in 0..x.len() {
                let h = step * widths[i];
                if h == 0.0 {
                    continue;
                }
                let mut stepped = x.clone();
                stepped[i] = search.clamp(i, x[i] + h);
                let up = objective.at(&stepped)?;
                stepped[i] = search.clamp(i, x[i] - h);
                let down = objective.at(&stepped)?;
                direction[i] = (up - down).signum() * h;
            }
            if direction.iter().all(|d| *d == 0.0) {
                break;
            }
            let next: Vec<f64> = x
                .iter()
                .zip(&direction)
                .enumerate()
                .map(|(i, (xi, di))| search.clamp(i, xi + di))
                .collect();
            let fn_next = objective.at(&next)?;
            if fn_next > fx {
                x = next;
                fx = fn_next;
            } else {
                step *= 0.5;
            }
        }
        Ok(fx)
    }
}

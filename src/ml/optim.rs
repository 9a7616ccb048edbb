use std::collections::HashMap;

use tracing::debug;

use super::{Optimizer, Tensor};

fn zeros_for(grads: &[&Tensor]) -> Vec<Tensor> {
    grads.iter().map(|g| Tensor::zeros_like(g)).collect()
}

pub struct SGD {
    alpha: f32,
}

impl SGD {
    pub fn new(alpha: f32) -> Self {
        Self { alpha }
    }
}

impl Optimizer for SGD {
    fn optimize(&mut self, _: usize, grads: Vec<&Tensor>) -> Vec<Tensor> {
        let mut ans_vec = Vec::new();

        for grad in grads {
            let data = grad.as_f32_slice().iter().map(|g| -g * self.alpha).collect();
            ans_vec.push(Tensor::new(data, grad.shape.clone()));
        }

        ans_vec
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.alpha = lr;
    }
}

/// SGD on gradients rescaled so the global norm never exceeds `rescale`.
pub struct ClippedSGD {
    lr: f32,
    rescale: f32,
    scale: f32,
}

impl ClippedSGD {
    pub fn new(lr: f32) -> Self {
        Self::with_rescale(lr, 5.0)
    }

    pub fn with_rescale(lr: f32, rescale: f32) -> Self {
        ClippedSGD {
            lr,
            rescale,
            scale: 1.0,
        }
    }
}

impl Optimizer for ClippedSGD {
    fn begin_step(&mut self, grad_norm: f32) {
        self.scale = self.rescale / self.rescale.max(grad_norm);
        if self.scale < 1.0 {
            debug!(grad_norm, scale = self.scale, "clipping gradients");
        }
    }

    fn optimize(&mut self, _: usize, grads: Vec<&Tensor>) -> Vec<Tensor> {
        let step = self.lr * self.scale;
        grads
            .into_iter()
            .map(|grad| {
                let data = grad.as_f32_slice().iter().map(|g| -g * step).collect();
                Tensor::new(data, grad.shape.clone())
            })
            .collect()
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adadelta with decay 0.95 and epsilon 1e-6. Needs no learning rate.
pub struct Adadelta {
    rho: f32,
    epsilon: f32,
    running_grads2: HashMap<usize, Vec<Tensor>>,
    running_up2: HashMap<usize, Vec<Tensor>>,
}

impl Default for Adadelta {
    fn default() -> Self {
        Self::new()
    }
}

impl Adadelta {
    pub fn new() -> Self {
        Adadelta {
            rho: 0.95,
            epsilon: 1e-6,
            running_grads2: HashMap::new(),
            running_up2: HashMap::new(),
        }
    }
}

impl Optimizer for Adadelta {
    fn optimize(&mut self, tar_id: usize, grads: Vec<&Tensor>) -> Vec<Tensor> {
        let rg2s = self
            .running_grads2
            .entry(tar_id)
            .or_insert_with(|| zeros_for(&grads));
        let ru2s = self
            .running_up2
            .entry(tar_id)
            .or_insert_with(|| zeros_for(&grads));
        let (rho, eps) = (self.rho, self.epsilon);

        let mut updates = Vec::with_capacity(grads.len());
        for ((grad, rg2), ru2) in grads.iter().zip(rg2s.iter_mut()).zip(ru2s.iter_mut()) {
            let mut update = Tensor::zeros_like(grad);
            let g = grad.as_f32_slice();
            let rg2 = rg2.f32_data_mut();
            let ru2 = ru2.f32_data_mut();
            let ud = update.f32_data_mut();

            for j in 0..g.len() {
                rg2[j] = rho * rg2[j] + (1.0 - rho) * g[j] * g[j];
                ud[j] = -(ru2[j] + eps).sqrt() / (rg2[j] + eps).sqrt() * g[j];
                ru2[j] = rho * ru2[j] + (1.0 - rho) * ud[j] * ud[j];
            }
            updates.push(update);
        }
        updates
    }
}

/// Graves' RMSProp with momentum on the update.
pub struct RMSProp {
    decay: f32,
    momentum: f32,
    step: f32,
    epsilon: f32,
    running_grads: HashMap<usize, Vec<Tensor>>,
    running_grads2: HashMap<usize, Vec<Tensor>>,
    updir: HashMap<usize, Vec<Tensor>>,
}

impl Default for RMSProp {
    fn default() -> Self {
        Self::new()
    }
}

impl RMSProp {
    pub fn new() -> Self {
        RMSProp {
            decay: 0.95,
            momentum: 0.9,
            step: 1e-4,
            epsilon: 1e-4,
            running_grads: HashMap::new(),
            running_grads2: HashMap::new(),
            updir: HashMap::new(),
        }
    }
}

impl Optimizer for RMSProp {
    fn optimize(&mut self, tar_id: usize, grads: Vec<&Tensor>) -> Vec<Tensor> {
        let rgs = self
            .running_grads
            .entry(tar_id)
            .or_insert_with(|| zeros_for(&grads));
        let rg2s = self
            .running_grads2
            .entry(tar_id)
            .or_insert_with(|| zeros_for(&grads));
        let uds = self.updir.entry(tar_id).or_insert_with(|| zeros_for(&grads));
        let d = self.decay;

        let mut updates = Vec::with_capacity(grads.len());
        for (i, grad) in grads.iter().enumerate() {
            let g = grad.as_f32_slice();
            let rg = rgs[i].f32_data_mut();
            let rg2 = rg2s[i].f32_data_mut();
            let ud = uds[i].f32_data_mut();

            for j in 0..g.len() {
                rg[j] = d * rg[j] + (1.0 - d) * g[j];
                rg2[j] = d * rg2[j] + (1.0 - d) * g[j] * g[j];
                ud[j] = self.momentum * ud[j]
                    - self.step * g[j] / (rg2[j] - rg[j] * rg[j] + self.epsilon).sqrt();
            }
            updates.push(uds[i].clone());
        }
        updates
    }
}

/// Outcome of [`conjugate_gradient`].
#[derive(Debug, Clone)]
pub struct CgResult {
    pub x: Vec<f32>,
    pub cost: f32,
    pub iterations: usize,
    pub converged: bool,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Minimises `f` (returning cost and gradient) from `x0` with nonlinear
/// Polak-Ribiere conjugate gradient and a backtracking Armijo line search.
///
/// `callback` sees the iterate after every accepted step. Stops after
/// `max_iter` iterations, when the gradient norm drops below `1e-5`, or
/// when no descent step can be found.
pub fn conjugate_gradient<F, C>(mut f: F, x0: Vec<f32>, max_iter: usize, mut callback: C) -> CgResult
where
    F: FnMut(&[f32]) -> (f32, Vec<f32>),
    C: FnMut(&[f32]),
{
    const GTOL: f32 = 1e-5;
    const C1: f32 = 1e-4;

    let mut x = x0;
    let (mut cost, mut grad) = f(&x);
    let mut dir: Vec<f32> = grad.iter().map(|g| -g).collect();
    let mut step = 1.0;

    for it in 0..max_iter {
        if dot(&grad, &grad).sqrt() < GTOL {
            return CgResult {
                x,
                cost,
                iterations: it,
                converged: true,
            };
        }

        let mut slope = dot(&grad, &dir);
        if slope >= 0.0 {
            // not a descent direction: restart along steepest descent
            dir = grad.iter().map(|g| -g).collect();
            slope = dot(&grad, &dir);
        }

        let mut alpha = step;
        let mut accepted = None;
        for _ in 0..40 {
            let trial: Vec<f32> = x.iter().zip(&dir).map(|(xi, di)| xi + alpha * di).collect();
            let (trial_cost, trial_grad) = f(&trial);
            if trial_cost.is_finite() && trial_cost <= cost + C1 * alpha * slope {
                accepted = Some((trial, trial_cost, trial_grad));
                break;
            }
            alpha *= 0.5;
        }

        let (x_new, cost_new, grad_new) = match accepted {
            Some(v) => v,
            None => {
                debug!(iteration = it, "line search failed");
                return CgResult {
                    x,
                    cost,
                    iterations: it,
                    converged: false,
                };
            }
        };

        let denom = dot(&grad, &grad);
        let beta = if denom > 0.0 {
            let num: f32 = grad_new
                .iter()
                .zip(&grad)
                .map(|(gn, g)| gn * (gn - g))
                .sum();
            (num / denom).max(0.0)
        } else {
            0.0
        };
        dir = grad_new
            .iter()
            .zip(&dir)
            .map(|(g, d)| -g + beta * d)
            .collect();

        step = (alpha * 2.0).min(1.0);
        x = x_new;
        cost = cost_new;
        grad = grad_new;
        callback(&x);
    }

    let converged = dot(&grad, &grad).sqrt() < GTOL;
    CgResult {
        x,
        cost,
        iterations: max_iter,
        converged,
    }
}

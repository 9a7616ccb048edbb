//! LSTM recurrence with sequence masking.
//!
//! Gate layout in `W`, `U` and `b` is `[i | f | o | c~]`, each block
//! `dim_proj` wide. For a step with real input the new state is blended
//! with the previous one by the mask, so padded positions carry the last
//! valid state forward:
//!
//! ```text
//! preact = h_{t-1} U + x_t W + b
//! c = f * c_{t-1} + i * c~
//! h = o * tanh(c)
//! c = m * c + (1 - m) * c_{t-1}
//! h = m * h + (1 - m) * h_{t-1}
//! ```

use std::path::Path;

use super::binary_io::*;
use super::funcs::sigmoid;
use super::init::ortho_weight;
use super::{accumulate, add_updates, Node, Tensor};
use crate::error::Result;

/// Produces the next step's input `[N, dim_input]` from the previous
/// hidden state `[N, dim_proj]`.
pub trait StepFeedback {
    fn next_input(&self, h_prev: &Tensor) -> Tensor;
}

impl<F: Fn(&Tensor) -> Tensor> StepFeedback for F {
    fn next_input(&self, h_prev: &Tensor) -> Tensor {
        self(h_prev)
    }
}

/// Where a step's input comes from once the given inputs run out.
pub enum Feedback {
    /// Inputs `[x, mask]`; the sequence must cover every step.
    None,
    /// Inputs `[mask, context]`; every step consumes `context [N, dim_input]`
    /// and gradients flow back into it.
    Context,
    /// Inputs `[x, mask]`; steps past the end of `x` feed `f(h_{t-1})`.
    /// No gradient flows through `f`.
    Custom(Box<dyn StepFeedback>),
}

pub struct Lstm {
    pub prefix: String,
    pub dim_proj: usize,
    pub dim_input: usize,
    /// `[dim_input, 4 * dim_proj]`
    pub w: Tensor,
    /// `[dim_proj, 4 * dim_proj]`
    pub u: Tensor,
    /// `[4 * dim_proj]`
    pub b: Tensor,
    pub w_grad: Option<Tensor>,
    pub u_grad: Option<Tensor>,
    pub b_grad: Option<Tensor>,
    pub ignore_grad: bool,
    feedback: Feedback,
    carry_state: bool,
    h_final: Option<Tensor>,
    /// Initial state of the latest training pass, for backward.
    h_init: Option<Tensor>,
}

struct StepCache {
    x: Vec<f32>,
    h_prev: Vec<f32>,
    c_prev: Vec<f32>,
    i: Vec<f32>,
    f: Vec<f32>,
    o: Vec<f32>,
    g: Vec<f32>,
    tanh_c: Vec<f32>,
    mask: Option<Vec<f32>>,
}

struct Split<'a> {
    x: Option<&'a Tensor>,
    mask: &'a Tensor,
    context: Option<&'a Tensor>,
}

fn blocks(rows: usize, dim_proj: usize) -> Tensor {
    let cols = 4 * dim_proj;
    let mut data = vec![0.0; rows * cols];
    for k in 0..4 {
        let block = ortho_weight(rows, dim_proj);
        for r in 0..rows {
            data[r * cols + k * dim_proj..r * cols + (k + 1) * dim_proj]
                .copy_from_slice(&block[r * dim_proj..(r + 1) * dim_proj]);
        }
    }
    Tensor::new(data, vec![rows, cols])
}

impl Lstm {
    /// `dim_proj` hidden units reading inputs of width `dim_input`.
    pub fn new(dim_proj: usize, dim_input: usize) -> Self {
        Lstm {
            prefix: "lstm".to_string(),
            dim_proj,
            dim_input,
            w: blocks(dim_input, dim_proj),
            u: blocks(dim_proj, dim_proj),
            b: Tensor::zeros(vec![4 * dim_proj]),
            w_grad: None,
            u_grad: None,
            b_grad: None,
            ignore_grad: false,
            feedback: Feedback::None,
            carry_state: false,
            h_final: None,
            h_init: None,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = feedback;
        self
    }

    /// Reuse the final hidden state of one training batch as the initial
    /// state of the next. Batches of a different size start from zeros.
    pub fn carry_state(mut self, carry: bool) -> Self {
        self.carry_state = carry;
        self
    }

    pub fn set_ignore(&mut self) {
        self.ignore_grad = true;
    }

    pub fn param_names(&self) -> [String; 3] {
        [
            format!("{}_W", self.prefix),
            format!("{}_U", self.prefix),
            format!("{}_b", self.prefix),
        ]
    }

    /// `(W, U, b)` clones, e.g. to share weights with another layer.
    pub fn params(&self) -> (Tensor, Tensor, Tensor) {
        (self.w.clone(), self.u.clone(), self.b.clone())
    }

    pub fn set_params(&mut self, w: Tensor, u: Tensor, b: Tensor) {
        assert_eq!(w.shape, self.w.shape);
        assert_eq!(u.shape, self.u.shape);
        assert_eq!(b.shape, self.b.shape);
        self.w = w;
        self.u = u;
        self.b = b;
    }

    pub fn final_hidden(&self) -> Option<&Tensor> {
        self.h_final.as_ref()
    }

    fn split<'a>(&self, inputs: &[&'a Tensor]) -> Split<'a> {
        assert_eq!(inputs.len(), 2, "lstm takes two inputs");
        let split = match self.feedback {
            Feedback::Context => Split {
                x: None,
                mask: inputs[0],
                context: Some(inputs[1]),
            },
            _ => Split {
                x: Some(inputs[0]),
                mask: inputs[1],
                context: None,
            },
        };
        assert_eq!(split.mask.shape.len(), 2, "mask must be [T, N]");
        split
    }

    /// Runs the recurrence, returning all hidden states `[T, N, H]` and
    /// the per-step values backward needs.
    fn run(&self, inputs: &[&Tensor], h0: Option<&Tensor>) -> (Vec<f32>, Vec<StepCache>) {
        let split = self.split(inputs);
        let n_steps = split.mask.shape[0];
        let n = split.mask.shape[1];
        let (h_dim, d_dim) = (self.dim_proj, self.dim_input);
        let g_dim = 4 * h_dim;

        let n_input = match split.x {
            Some(x) => {
                assert_eq!(x.shape.len(), 3, "lstm input must be [T, N, dim_input]");
                assert_eq!(x.shape[1], n, "input and mask disagree on samples");
                assert_eq!(x.shape[2], d_dim, "input width must be dim_input");
                x.shape[0]
            }
            None => 0,
        };
        assert!(
            n_input <= n_steps,
            "{} input steps exceed the {} steps of the mask",
            n_input,
            n_steps
        );
        if n_input < n_steps && matches!(self.feedback, Feedback::None) {
            panic!(
                "lstm {} asked for {} steps with {} inputs but no feedback function",
                self.prefix, n_steps, n_input
            );
        }
        if let Some(ctx) = split.context {
            assert_eq!(ctx.shape, vec![n, d_dim], "context must be [N, dim_input]");
        }

        let mut h = match h0 {
            Some(h0) if self.carry_state && h0.len() == n * h_dim => h0.as_f32_slice().to_vec(),
            _ => vec![0.0; n * h_dim],
        };
        let mut c = vec![0.0; n * h_dim];

        let w = self.w.as_f32_slice();
        let u = self.u.as_f32_slice();
        let b = self.b.as_f32_slice();
        let mask = split.mask.as_f32_slice();

        let mut hs = Vec::with_capacity(n_steps * n * h_dim);
        let mut steps = Vec::with_capacity(n_steps);

        for t in 0..n_steps {
            let x_t: Vec<f32> = if t < n_input {
                let x = split.x.map(|x| x.as_f32_slice()).unwrap_or(&[]);
                x[t * n * d_dim..(t + 1) * n * d_dim].to_vec()
            } else {
                match &self.feedback {
                    Feedback::Context => split
                        .context
                        .map(|ctx| ctx.as_f32_slice().to_vec())
                        .unwrap_or_default(),
                    Feedback::Custom(f) => {
                        let next = f.next_input(&Tensor::new(h.clone(), vec![n, h_dim]));
                        assert_eq!(next.len(), n * d_dim, "feedback must return [N, dim_input]");
                        next.data
                    }
                    Feedback::None => unreachable!(),
                }
            };

            let mut preact = vec![0.0; n * g_dim];
            for s in 0..n {
                let row = &mut preact[s * g_dim..(s + 1) * g_dim];
                row.copy_from_slice(b);
                for d in 0..d_dim {
                    let xv = x_t[s * d_dim + d];
                    if xv != 0.0 {
                        for (r, wv) in row.iter_mut().zip(&w[d * g_dim..(d + 1) * g_dim]) {
                            *r += xv * wv;
                        }
                    }
                }
                for j in 0..h_dim {
                    let hv = h[s * h_dim + j];
                    if hv != 0.0 {
                        for (r, uv) in row.iter_mut().zip(&u[j * g_dim..(j + 1) * g_dim]) {
                            *r += hv * uv;
                        }
                    }
                }
            }

            let step_mask: Option<Vec<f32>> = if t < n_input {
                Some(mask[t * n..(t + 1) * n].to_vec())
            } else {
                None
            };

            let mut cache = StepCache {
                x: x_t,
                h_prev: h.clone(),
                c_prev: c.clone(),
                i: vec![0.0; n * h_dim],
                f: vec![0.0; n * h_dim],
                o: vec![0.0; n * h_dim],
                g: vec![0.0; n * h_dim],
                tanh_c: vec![0.0; n * h_dim],
                mask: None,
            };

            for s in 0..n {
                let m = step_mask.as_ref().map(|m| m[s]).unwrap_or(1.0);
                for j in 0..h_dim {
                    let k = s * h_dim + j;
                    let row = &preact[s * g_dim..(s + 1) * g_dim];
                    let i = sigmoid(row[j]);
                    let f = sigmoid(row[h_dim + j]);
                    let o = sigmoid(row[2 * h_dim + j]);
                    let g = row[3 * h_dim + j].tanh();
                    let c_new = f * c[k] + i * g;
                    let tanh_c = c_new.tanh();
                    let h_new = o * tanh_c;

                    cache.i[k] = i;
                    cache.f[k] = f;
                    cache.o[k] = o;
                    cache.g[k] = g;
                    cache.tanh_c[k] = tanh_c;

                    c[k] = m * c_new + (1.0 - m) * c[k];
                    h[k] = m * h_new + (1.0 - m) * h[k];
                }
            }
            cache.mask = step_mask;

            hs.extend_from_slice(&h);
            steps.push(cache);
        }

        (hs, steps)
    }
}

impl Node for Lstm {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        let refs: Vec<&Tensor> = inputs.iter().collect();
        let (hs, steps) = self.run(&refs, self.h_final.as_ref());
        let n = if steps.is_empty() {
            refs[match self.feedback {
                Feedback::Context => 0,
                _ => 1,
            }]
            .shape[1]
        } else {
            steps[0].h_prev.len() / self.dim_proj
        };
        Tensor::new(hs, vec![steps.len(), n, self.dim_proj])
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let (_, steps) = self.run(&inputs, self.h_init.as_ref());
        let split = self.split(&inputs);
        let (h_dim, d_dim) = (self.dim_proj, self.dim_input);
        let g_dim = 4 * h_dim;
        let n = split.mask.shape[1];

        let mut w_grad = Tensor::zeros_like(&self.w);
        let mut u_grad = Tensor::zeros_like(&self.u);
        let mut b_grad = Tensor::zeros_like(&self.b);
        let mut x_grad = split.x.map(Tensor::zeros_like);
        let mut ctx_grad = split.context.map(Tensor::zeros_like);
        let n_input = split.x.map(|x| x.shape[0]).unwrap_or(0);

        let w = self.w.as_f32_slice();
        let u = self.u.as_f32_slice();
        let grad_data = grad.as_f32_slice();

        let mut dh_next = vec![0.0; n * h_dim];
        let mut dc_next = vec![0.0; n * h_dim];

        for (t, st) in steps.iter().enumerate().rev() {
            let mut dpre = vec![0.0; n * g_dim];
            let mut dh_prev = vec![0.0; n * h_dim];
            let mut dc_prev = vec![0.0; n * h_dim];

            for s in 0..n {
                let m = st.mask.as_ref().map(|m| m[s]).unwrap_or(1.0);
                for j in 0..h_dim {
                    let k = s * h_dim + j;
                    let dh = grad_data[(t * n + s) * h_dim + j] + dh_next[k];
                    let dh_new = m * dh;
                    let mut dc_new = m * dc_next[k];

                    let (i, f, o, g, tc) = (st.i[k], st.f[k], st.o[k], st.g[k], st.tanh_c[k]);
                    let d_o = dh_new * tc;
                    dc_new += dh_new * o * (1.0 - tc * tc);
                    let d_f = dc_new * st.c_prev[k];
                    let d_i = dc_new * g;
                    let d_g = dc_new * i;

                    dc_prev[k] = dc_new * f + (1.0 - m) * dc_next[k];
                    dh_prev[k] = (1.0 - m) * dh;

                    let row = s * g_dim;
                    dpre[row + j] = d_i * i * (1.0 - i);
                    dpre[row + h_dim + j] = d_f * f * (1.0 - f);
                    dpre[row + 2 * h_dim + j] = d_o * o * (1.0 - o);
                    dpre[row + 3 * h_dim + j] = d_g * (1.0 - g * g);
                }
            }

            {
                let ug = u_grad.f32_data_mut();
                let wg = w_grad.f32_data_mut();
                let bg = b_grad.f32_data_mut();
                for s in 0..n {
                    let dp = &dpre[s * g_dim..(s + 1) * g_dim];
                    for (bv, d) in bg.iter_mut().zip(dp.iter()) {
                        *bv += d;
                    }
                    for j in 0..h_dim {
                        let hv = st.h_prev[s * h_dim + j];
                        let u_row = &u[j * g_dim..(j + 1) * g_dim];
                        let mut acc = 0.0;
                        for kk in 0..g_dim {
                            ug[j * g_dim + kk] += hv * dp[kk];
                            acc += dp[kk] * u_row[kk];
                        }
                        dh_prev[s * h_dim + j] += acc;
                    }
                    for d in 0..d_dim {
                        let xv = st.x[s * d_dim + d];
                        for kk in 0..g_dim {
                            wg[d * g_dim + kk] += xv * dp[kk];
                        }
                    }
                }
            }

            let dx_target: Option<&mut [f32]> = if t < n_input {
                x_grad
                    .as_mut()
                    .map(|xg| &mut xg.f32_data_mut()[t * n * d_dim..(t + 1) * n * d_dim])
            } else if let Feedback::Context = self.feedback {
                ctx_grad.as_mut().map(|cg| &mut cg.f32_data_mut()[..])
            } else {
                None
            };
            if let Some(dx) = dx_target {
                for s in 0..n {
                    let dp = &dpre[s * g_dim..(s + 1) * g_dim];
                    for d in 0..d_dim {
                        let w_row = &w[d * g_dim..(d + 1) * g_dim];
                        let acc: f32 = dp.iter().zip(w_row.iter()).map(|(a, b)| a * b).sum();
                        dx[s * d_dim + d] += acc;
                    }
                }
            }

            dh_next = dh_prev;
            dc_next = dc_prev;
        }

        accumulate(&mut self.w_grad, w_grad);
        accumulate(&mut self.u_grad, u_grad);
        accumulate(&mut self.b_grad, b_grad);

        let mask_grad = Tensor::zeros_like(split.mask);
        match self.feedback {
            Feedback::Context => vec![
                mask_grad,
                ctx_grad.unwrap_or_else(Tensor::null),
            ],
            _ => vec![x_grad.unwrap_or_else(Tensor::null), mask_grad],
        }
    }

    fn record_output(&mut self, output: &Tensor) {
        if !self.carry_state || output.shape[0] == 0 {
            return;
        }
        let step = output.shape[1] * output.shape[2];
        let last = output.as_f32_slice()[output.len() - step..].to_vec();
        let last = Tensor::new(last, vec![output.shape[1], output.shape[2]]);
        self.h_init = self.h_final.replace(last);
    }

    fn no_grad(&self) -> bool {
        self.ignore_grad
    }

    fn has_params(&self) -> bool {
        !self.ignore_grad
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        Some(vec![
            self.w_grad.as_ref()?,
            self.u_grad.as_ref()?,
            self.b_grad.as_ref()?,
        ])
    }

    fn clear_grad(&mut self) {
        self.w_grad = None;
        self.u_grad = None;
        self.b_grad = None;
    }

    fn param_tensors(&self) -> Vec<&Tensor> {
        vec![&self.w, &self.u, &self.b]
    }

    fn param_tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.w, &mut self.u, &mut self.b]
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        add_updates(vec![&mut self.w, &mut self.u, &mut self.b], &update);
        self.clear_grad();
    }

    fn print(&self) {
        let [w, u, b] = self.param_names();
        println!("{}:{:?}, {}:{:?}, {}:{:?}", w, self.w, u, self.u, b, self.b)
    }

    fn save_param(&self, path: &Path) -> Result<()> {
        save_tensors(path, TYPE_LSTM, &[&self.w, &self.u, &self.b])?;
        Ok(())
    }

    fn load_param(&mut self, path: &Path) -> Result<()> {
        let loaded = load_tensors(path, TYPE_LSTM, 3)?;
        let [w, u, b] = self.param_names();
        check_shape(&loaded[0], &self.w, &w)?;
        check_shape(&loaded[1], &self.u, &u)?;
        check_shape(&loaded[2], &self.b, &b)?;
        let mut loaded = loaded.into_iter();
        if let (Some(w), Some(u), Some(b)) = (loaded.next(), loaded.next(), loaded.next()) {
            self.set_params(w, u, b);
        }
        Ok(())
    }
}

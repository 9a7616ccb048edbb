use std::cell::RefCell;

use super::Node;
use super::Tensor;
use crate::utills::rand::get_random_bernoulli;

/// Elementwise function whose derivative can be written in terms of the
/// input `x` and output `y`.
pub trait SingleShoot {
    fn single_forward(&self, x: f32) -> f32;
    fn single_backward(&self, x: f32, y: f32) -> f32;
}

impl<F: SingleShoot> Node for F {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, output: &Tensor) -> Vec<Tensor> {
        let mut igrad = Tensor::zeros_like(inputs[0]);
        let grad_data = grad.as_f32_slice();
        let input_data = inputs[0].as_f32_slice();
        let output_data = output.as_f32_slice();
        let igrad_f32 = igrad.f32_data_mut();

        for i in 0..grad_data.len() {
            igrad_f32[i] = grad_data[i] * self.single_backward(input_data[i], output_data[i]);
        }

        vec![igrad]
    }
    fn call(&self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        let output_vec = input
            .as_f32_slice()
            .iter()
            .map(|&x| self.single_forward(x))
            .collect();

        Tensor::new(output_vec, input.shape.clone())
    }
}

#[derive(Default)]
pub struct ReLU {}

impl ReLU {
    pub fn new() -> Self {
        ReLU {}
    }
}

impl SingleShoot for ReLU {
    fn single_forward(&self, x: f32) -> f32 {
        x.max(0.0)
    }
    fn single_backward(&self, x: f32, _: f32) -> f32 {
        if x > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Default)]
pub struct Tanh {}

impl Tanh {
    pub fn new() -> Self {
        Tanh {}
    }
}

impl SingleShoot for Tanh {
    fn single_backward(&self, _: f32, y: f32) -> f32 {
        1.0 - y.powi(2)
    }
    fn single_forward(&self, x: f32) -> f32 {
        x.tanh()
    }
}

pub struct Sigmoid {
    alpha: f32,
}

impl Default for Sigmoid {
    fn default() -> Self {
        Sigmoid::new(1.0)
    }
}

impl Sigmoid {
    pub fn new(alpha: f32) -> Self {
        Sigmoid { alpha }
    }
}

impl SingleShoot for Sigmoid {
    fn single_backward(&self, _: f32, y: f32) -> f32 {
        self.alpha * y * (1.0 - y)
    }
    fn single_forward(&self, x: f32) -> f32 {
        sigmoid(x * self.alpha)
    }
}

#[derive(Default)]
pub struct Identity {}

impl Identity {
    pub fn new() -> Self {
        Identity {}
    }
}

impl SingleShoot for Identity {
    fn single_forward(&self, x: f32) -> f32 {
        x
    }
    fn single_backward(&self, _: f32, _: f32) -> f32 {
        1.0
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-wise softmax over the last axis of a flat buffer.
pub fn softmax_rows(input: &[f32], width: usize) -> Vec<f32> {
    let mut out = vec![0.0; input.len()];
    for (row, out_row) in input.chunks(width).zip(out.chunks_mut(width)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mut sum = 0.0;
        for (o, &x) in out_row.iter_mut().zip(row.iter()) {
            *o = (x - max).exp();
            sum += *o;
        }
        out_row.iter_mut().for_each(|o| *o /= sum);
    }
    out
}

/// Softmax over the last axis; any leading shape is treated as a batch.
#[derive(Default)]
pub struct Softmax {}

impl Softmax {
    pub fn new() -> Self {
        Softmax {}
    }
}

impl Node for Softmax {
    fn call(&self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        let width = *input.shape.last().expect("softmax on a scalar");

        Tensor::new(
            softmax_rows(input.as_f32_slice(), width),
            input.shape.clone(),
        )
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, output: &Tensor) -> Vec<Tensor> {
        let mut igrad = Tensor::zeros_like(inputs[0]);
        let &width = inputs[0].shape.last().unwrap();
        let igrad_f32 = igrad.f32_data_mut();
        let batch = igrad_f32.len() / width;
        let output_data = output.as_f32_slice();
        let grad_data = grad.as_f32_slice();

        for i in 0..batch {
            let offset = i * width;
            let mut dot_prod = 0.0;
            for j in 0..width {
                dot_prod += output_data[offset + j] * grad_data[offset + j];
            }
            for j in 0..width {
                igrad_f32[offset + j] =
                    output_data[offset + j] * (grad_data[offset + j] - dot_prod);
            }
        }

        vec![igrad]
    }
}

/// Mean negative log-likelihood of integer labels under a probability table.
///
/// Inputs: `probs [.., V]`, `labels [..]` holding class ids, and an
/// optional `weights [..]` (typically a sequence mask). Without weights
/// the cost is `-mean(log(p[y] + offset))`; with weights it is the
/// weighted mean.
pub struct NegativeLogLikelihood {
    offset: f32,
}

impl Default for NegativeLogLikelihood {
    fn default() -> Self {
        Self::new()
    }
}

impl NegativeLogLikelihood {
    pub fn new() -> Self {
        NegativeLogLikelihood { offset: 1e-8 }
    }

    pub fn with_offset(offset: f32) -> Self {
        NegativeLogLikelihood { offset }
    }

    fn row_weights(inputs: &[&Tensor], rows: usize) -> (Vec<f32>, f32) {
        match inputs.get(2) {
            Some(w) => {
                assert_eq!(w.len(), rows, "weights must have one entry per label");
                let w = w.as_f32_slice().to_vec();
                let total = w.iter().sum::<f32>();
                (w, total)
            }
            None => (vec![1.0; rows], rows as f32),
        }
    }
}

impl Node for NegativeLogLikelihood {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert!(inputs.len() == 2 || inputs.len() == 3);
        let probs = &inputs[0];
        let width = *probs.shape.last().expect("probabilities need a class axis");
        let rows = probs.len() / width;
        let labels = inputs[1].to_ids();
        assert_eq!(labels.len(), rows, "one label per probability row");
        let refs: Vec<&Tensor> = inputs.iter().collect();
        let (weights, total) = Self::row_weights(&refs, rows);

        let p = probs.as_f32_slice();
        let mut loss = 0.0;
        for (r, &y) in labels.iter().enumerate() {
            assert!(y < width, "label {} out of range for {} classes", y, width);
            loss -= weights[r] * (p[r * width + y] + self.offset).ln();
        }
        let loss = if total > 0.0 { loss / total } else { 0.0 };

        Tensor::new(vec![loss], vec![1])
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let probs = inputs[0];
        let width = *probs.shape.last().unwrap();
        let rows = probs.len() / width;
        let labels = inputs[1].to_ids();
        let (weights, total) = Self::row_weights(&inputs, rows);
        let g = grad.get_item().expect("loss gradient must be scalar");

        let mut pgrad = Tensor::zeros_like(probs);
        if total > 0.0 {
            let p = probs.as_f32_slice();
            let pgrad_f32 = pgrad.f32_data_mut();
            for (r, &y) in labels.iter().enumerate() {
                let idx = r * width + y;
                pgrad_f32[idx] = -g * weights[r] / (total * (p[idx] + self.offset));
            }
        }

        let mut grads = vec![pgrad, Tensor::zeros_like(inputs[1])];
        if let Some(w) = inputs.get(2) {
            grads.push(Tensor::zeros_like(w));
        }
        grads
    }
}

/// Drops units with probability 0.5 while training and halves the
/// activations at inference.
#[derive(Default)]
pub struct Dropout {
    is_inference: bool,
    mask: RefCell<Option<Vec<f32>>>,
}

impl Dropout {
    pub fn new() -> Self {
        Dropout {
            is_inference: false,
            mask: RefCell::new(None),
        }
    }
}

impl Node for Dropout {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        let input = &inputs[0];
        let x = input.as_f32_slice();
        if self.is_inference {
            return Tensor::new(x.iter().map(|v| v * 0.5).collect(), input.shape.clone());
        }
        let mask = get_random_bernoulli(x.len(), 0.5);
        let out = x.iter().zip(mask.iter()).map(|(v, m)| v * m).collect();
        *self.mask.borrow_mut() = Some(mask);
        Tensor::new(out, input.shape.clone())
    }

    fn backward(&mut self, grad: &Tensor, _inputs: Vec<&Tensor>, _output: &Tensor) -> Vec<Tensor> {
        let g = grad.as_f32_slice();
        let data = if self.is_inference {
            g.iter().map(|v| v * 0.5).collect()
        } else {
            let mask = self.mask.borrow();
            let mask = mask.as_ref().expect("dropout backward before forward");
            g.iter().zip(mask.iter()).map(|(v, m)| v * m).collect()
        };
        vec![Tensor::new(data, grad.shape.clone())]
    }

    fn prepare_inference(&mut self) {
        self.is_inference = true;
    }

    fn prepare_train(&mut self) {
        self.is_inference = false;
    }
}

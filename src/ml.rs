/// Binary I/O utilities for model parameters.
pub(crate) mod binary_io;
/// Early stopping bookkeeping for validation-driven training loops.
pub mod early_stopping;
/// Embedding lookup tables.
pub mod embedding;
/// Activation functions and loss functions.
pub mod funcs;
/// Parameter initialisation schemes.
pub mod init;
/// Logging utilities for training (requires `logging` feature).
#[cfg(feature = "logging")]
pub mod logger;
/// Long short-term memory recurrence.
pub mod lstm;
/// Metrics for model evaluation.
pub mod metrics;
/// Operations for tensor manipulation.
pub mod ops;
/// Optimization algorithms (SGD, Adadelta, RMSProp, conjugate gradient).
pub mod optim;
/// Dense layers and layer helpers.
pub mod params;
/// Progress tracking utilities.
pub mod progress;

/// Macro to create a sequential neural network layer composition.
///
/// # Example
/// ```ignore
/// let output_id = sequential!(graph, input_id, [
///     Linear::auto(784, 128),
///     ReLU::new(),
///     Linear::auto(128, 10),
/// ]);
/// ```
#[macro_export]
macro_rules! sequential {
    ($graph:expr, $input:expr, [$($node:expr),* $(,)?]) => {{
        let g = &mut $graph;
        let mut last_id = $input;
        $(
            last_id = g.add_layer(vec![last_id], Box::new($node));
        )*
        last_id
    }};
}

use crate::error::Result;
use crate::utills::rand::*;

use std::fs;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

pub use init::xiver_vec;

/// Multi-dimensional array for neural network computations.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    pub fn from_shape(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Tensor {
            data: get_random_normal(size, 0.0, 1.0),
            shape,
        }
    }

    pub fn zeros_like(tensor: &Tensor) -> Self {
        Tensor {
            data: vec![0.0; tensor.len()],
            shape: tensor.shape.clone(),
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Tensor {
            data: vec![0.0; size],
            shape,
        }
    }

    pub fn ones_like(tensor: &Tensor) -> Self {
        Tensor {
            data: vec![1.0; tensor.len()],
            shape: tensor.shape.clone(),
        }
    }

    pub fn ones(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Tensor {
            data: vec![1.0; size],
            shape,
        }
    }

    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        assert_eq!(
            size,
            data.len(),
            "data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Tensor { data, shape }
    }

    /// Integer ids stored as f32, the convention for label and token tensors.
    pub fn from_ids(ids: &[usize], shape: Vec<usize>) -> Self {
        Tensor::new(ids.iter().map(|&i| i as f32).collect(), shape)
    }

    pub fn null() -> Self {
        Tensor {
            data: Vec::new(),
            shape: Vec::new(),
        }
    }

    pub fn get_item(&self) -> Option<f32> {
        if self.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_f32_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn f32_data_mut(&mut self) -> &mut Vec<f32> {
        &mut self.data
    }

    /// Ids stored in the tensor, truncated towards zero.
    pub fn to_ids(&self) -> Vec<usize> {
        self.data.iter().map(|&v| v as usize).collect()
    }

    pub fn sum_squares(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Returns the indices of the maximum values along a dimension.
    ///
    /// # Arguments
    /// * `dim` - If None, returns the index of the global maximum as a scalar tensor.
    ///          If Some(d), returns the indices of maximum values along dimension d.
    pub fn argmax(&self, dim: Option<usize>) -> Tensor {
        let data = self.as_f32_slice();

        match dim {
            None => {
                let mut max_idx = 0;
                let mut max_val = data[0];
                for (i, &val) in data.iter().enumerate().skip(1) {
                    if val > max_val {
                        max_val = val;
                        max_idx = i;
                    }
                }
                Tensor::new(vec![max_idx as f32], vec![1])
            }
            Some(d) => {
                assert!(
                    d < self.shape.len(),
                    "Dimension {} out of bounds for shape {:?}",
                    d,
                    self.shape
                );

                let dim_size = self.shape[d];
                let inner: usize = self.shape[d + 1..].iter().product();
                let outer: usize = self.shape[..d].iter().product();

                let mut out_shape = self.shape.clone();
                out_shape.remove(d);
                if out_shape.is_empty() {
                    out_shape.push(1);
                }

                let mut result = vec![0.0; outer * inner];
                for o in 0..outer {
                    for i in 0..inner {
                        let mut max_idx = 0;
                        let mut max_val = f32::NEG_INFINITY;
                        for j in 0..dim_size {
                            let val = data[(o * dim_size + j) * inner + i];
                            if val > max_val {
                                max_val = val;
                                max_idx = j;
                            }
                        }
                        result[o * inner + i] = max_idx as f32;
                    }
                }

                Tensor::new(result, out_shape)
            }
        }
    }
}

/// Creates a batched tensor from a vector of tensors.
pub fn create_batch(tensors: Vec<Tensor>) -> Tensor {
    let size = tensors[0].len();
    let mut batch_data = Vec::with_capacity(size * tensors.len());
    let mut shape = tensors[0].shape.clone();
    shape.insert(0, tensors.len());

    for tensor in tensors {
        assert_eq!(tensor.len(), size);
        batch_data.extend_from_slice(tensor.as_f32_slice());
    }

    Tensor::new(batch_data, shape)
}

impl Add for Tensor {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += &rhs;
        self
    }
}

impl AddAssign for Tensor {
    fn add_assign(&mut self, rhs: Self) {
        *self += &rhs;
    }
}

impl AddAssign<&Tensor> for Tensor {
    fn add_assign(&mut self, rhs: &Tensor) {
        assert_eq!(self.len(), rhs.len());
        for (v, r) in self.data.iter_mut().zip(rhs.data.iter()) {
            *v += r;
        }
    }
}

/// Adds optimizer updates to parameter tensors in place.
pub(crate) fn add_updates(params: Vec<&mut Tensor>, update: &[Tensor]) {
    assert_eq!(params.len(), update.len());
    for (p, u) in params.into_iter().zip(update.iter()) {
        *p += u;
    }
}

/// Accumulates a freshly computed gradient into an optional slot.
pub(crate) fn accumulate(slot: &mut Option<Tensor>, grad: Tensor) {
    if let Some(existing) = slot.as_mut() {
        *existing += grad;
    } else {
        *slot = Some(grad);
    }
}

/// Trait for neural network layers and operations.
///
/// Implementors define forward and backward passes for automatic differentiation.
pub trait Node {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, output: &Tensor) -> Vec<Tensor>;
    fn call(&self, input: Vec<Tensor>) -> Tensor;
    fn no_grad(&self) -> bool {
        false
    }
    fn has_params(&self) -> bool {
        false
    }
    fn apply_update(&mut self, _update: Vec<Tensor>) {}
    fn load_param(&mut self, _file: &Path) -> Result<()> {
        Ok(())
    }
    fn save_param(&self, _file: &Path) -> Result<()> {
        Ok(())
    }
    /// Accumulated gradients, one per parameter tensor, or `None` when
    /// the node received no gradient since the last update.
    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        None
    }
    fn clear_grad(&mut self) {}
    fn param_tensors(&self) -> Vec<&Tensor> {
        Vec::new()
    }
    fn param_tensors_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }
    /// Called with the node's output after each training-mode forward pass.
    fn record_output(&mut self, _output: &Tensor) {}
    fn print(&self) {}
    fn prepare_inference(&mut self) {}
    fn prepare_train(&mut self) {}
}

/// Trait for optimization algorithms.
///
/// `begin_step` runs once per update with the global gradient norm, then
/// `optimize` is called for every parameterized layer. The returned
/// tensors are added to the layer's parameters.
pub trait Optimizer {
    fn optimize(&mut self, tar_id: usize, grads: Vec<&Tensor>) -> Vec<Tensor>;
    fn begin_step(&mut self, _grad_norm: f32) {}
    fn set_learning_rate(&mut self, _lr: f32) {}
}

/// Placeholder node for graph inputs.
#[derive(Default)]
pub struct Placeholder {}

impl Node for Placeholder {
    fn backward(&mut self, _: &Tensor, _: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        vec![]
    }
    fn call(&self, _: Vec<Tensor>) -> Tensor {
        Tensor::null()
    }
    fn no_grad(&self) -> bool {
        true
    }
}

impl Placeholder {
    pub fn new() -> Self {
        Placeholder {}
    }
}

/// Computational graph for automatic differentiation.
///
/// Manages forward and backward passes through a network of nodes.
/// Inputs of a node always carry smaller ids than the node itself.
pub struct Graph {
    pub layers: Vec<Box<dyn Node>>,
    pub optimizer: Option<Box<dyn Optimizer>>,
    pub flows: Vec<Option<Tensor>>,
    pub backflows: Vec<Option<Tensor>>,
    placeholder: Option<Vec<usize>>,
    parameters: Vec<usize>,
    inputs: Vec<Vec<usize>>,
    pub target: usize,
    pub is_inference: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            layers: Vec::new(),
            flows: Vec::new(),
            optimizer: None,
            backflows: Vec::new(),
            parameters: Vec::new(),
            placeholder: None,
            inputs: Vec::new(),
            target: 0,
            is_inference: false,
        }
    }

    pub fn set_inference_mode(&mut self) {
        self.is_inference = true;
        for layer in self.layers.iter_mut() {
            layer.prepare_inference();
        }
    }

    pub fn set_train_mode(&mut self) {
        self.is_inference = false;
        for layer in self.layers.iter_mut() {
            layer.prepare_train();
        }
    }

    pub fn set_optimizer<O: Optimizer + 'static>(&mut self, optimizer: O) {
        self.optimizer = Some(Box::new(optimizer));
    }

    /// Propagates gradients from the target back to every reachable node.
    ///
    /// Nodes are visited in reverse id order, so a node shared by several
    /// consumers has received all contributions before it propagates.
    pub fn backward(&mut self) {
        let target = self.target;
        let seed = Tensor::ones_like(
            self.flows[target]
                .as_ref()
                .expect("backward called before forward"),
        );
        self.backflows[target] = Some(seed);

        for tar in (0..=target).rev() {
            if self.layers[tar].no_grad() {
                continue;
            }
            let grad = match self.backflows[tar].take() {
                Some(grad) => grad,
                None => continue,
            };
            let input_ids = &self.inputs[tar];
            let input_vecs: Vec<&Tensor> = input_ids
                .iter()
                .map(|id| self.flows[*id].as_ref().expect("input flow missing"))
                .collect();
            let output = self.flows[tar].as_ref().expect("output flow missing");
            let input_grads = self.layers[tar].backward(&grad, input_vecs, output);

            for (&input_id, input_grad) in input_ids.iter().zip(input_grads) {
                accumulate(&mut self.backflows[input_id], input_grad);
            }
            self.backflows[tar] = Some(grad);
        }
    }

    pub fn inference(&self, mut input_vec: Vec<Tensor>) -> Tensor {
        let placeholder = self.placeholder.as_ref().expect("placeholder not set");
        assert_eq!(placeholder.len(), input_vec.len());
        let mut flows = vec![None; self.layers.len()];

        for (i, &id) in placeholder.iter().enumerate() {
            flows[id] = Some(std::mem::replace(&mut input_vec[i], Tensor::null()));
        }

        let mut stack: Vec<usize> = vec![self.target];
        while let Some(tar) = stack.pop() {
            if flows[tar].is_some() {
                continue;
            }
            stack.push(tar);
            let input_ids = &self.inputs[tar];
            let mut full = true;
            for input_id in input_ids.iter() {
                if flows[*input_id].is_none() {
                    stack.push(*input_id);
                    full = false;
                }
            }
            if !full {
                continue;
            }
            stack.pop();
            let inputs = input_ids
                .iter()
                .map(|id| flows[*id].clone().expect("input flow missing"))
                .collect();
            flows[tar] = Some(self.layers[tar].call(inputs));
        }
        flows[self.target].take().expect("target flow missing")
    }

    pub fn forward(&mut self, input_vec: Vec<Tensor>) -> Tensor {
        let placeholder = self.placeholder.clone().expect("placeholder not set");
        self.forward_(placeholder, input_vec)
    }

    pub fn forward_(&mut self, placeholder: Vec<usize>, mut input_vec: Vec<Tensor>) -> Tensor {
        assert_eq!(placeholder.len(), input_vec.len());
        for (i, &id) in placeholder.iter().enumerate() {
            self.flows[id] = Some(std::mem::replace(&mut input_vec[i], Tensor::null()));
        }

        let mut stack: Vec<usize> = vec![self.target];
        while let Some(tar) = stack.pop() {
            if self.flows[tar].is_some() {
                continue;
            }
            stack.push(tar);
            let input_ids = &self.inputs[tar];
            let mut full = true;
            for input_id in input_ids.iter() {
                if self.flows[*input_id].is_none() {
                    stack.push(*input_id);
                    full = false;
                }
            }
            if !full {
                continue;
            }
            stack.pop();
            let inputs = input_ids
                .iter()
                .map(|id| self.flows[*id].clone().expect("input flow missing"))
                .collect();
            let out = self.layers[tar].call(inputs);
            if !self.is_inference {
                self.layers[tar].record_output(&out);
            }
            self.flows[tar] = Some(out);
        }

        self.flows[self.target].clone().expect("target flow missing")
    }

    /// Global L2 norm over every accumulated parameter gradient.
    pub fn grad_norm(&self) -> f32 {
        let mut sum = 0.0;
        for &id in self.parameters.iter() {
            if let Some(grads) = self.layers[id].pull_grad() {
                sum += grads.iter().map(|g| g.sum_squares()).sum::<f32>();
            }
        }
        sum.sqrt()
    }

    pub fn optimize(&mut self) {
        let grad_norm = self.grad_norm();
        if let Some(optimizer) = self.optimizer.as_mut() {
            optimizer.begin_step(grad_norm);
            for &id in self.parameters.iter() {
                let update = match self.layers[id].pull_grad() {
                    Some(grads) => optimizer.optimize(id, grads),
                    None => continue,
                };
                self.layers[id].apply_update(update);
            }
        }
    }

    pub fn zero_grad(&mut self) {
        for &id in self.parameters.iter() {
            self.layers[id].clear_grad();
        }
    }

    pub fn push_placeholder(&mut self) -> usize {
        self.layers.push(Box::new(Placeholder::new()));
        self.flows.push(None);
        self.backflows.push(None);
        self.inputs.push(Vec::new());

        self.inputs.len() - 1
    }

    pub fn add_layer(&mut self, inputs: Vec<usize>, node: Box<dyn Node>) -> usize {
        let id = self.layers.len();
        for &i in inputs.iter() {
            assert!(i < id, "input {} is not defined before layer {}", i, id);
        }
        if node.has_params() {
            self.parameters.push(id);
        }
        self.layers.push(node);
        self.flows.push(None);
        self.backflows.push(None);
        self.inputs.push(inputs);

        id
    }

    pub fn reset(&mut self) {
        for i in 0..self.flows.len() {
            self.flows[i] = None;
            self.backflows[i] = None
        }
    }

    pub fn set_target(&mut self, id: usize) {
        self.target = id;
    }

    pub fn set_placeholder(&mut self, placeholder: Vec<usize>) {
        self.placeholder = Some(placeholder);
    }

    pub fn parameter_ids(&self) -> &[usize] {
        &self.parameters
    }

    /// All trainable values concatenated in layer order.
    pub fn flat_params(&self) -> Vec<f32> {
        let mut out = Vec::new();
        for &id in self.parameters.iter() {
            for t in self.layers[id].param_tensors() {
                out.extend_from_slice(t.as_f32_slice());
            }
        }
        out
    }

    pub fn set_flat_params(&mut self, values: &[f32]) {
        let mut offset = 0;
        for &id in self.parameters.iter() {
            for t in self.layers[id].param_tensors_mut() {
                let n = t.len();
                t.f32_data_mut().copy_from_slice(&values[offset..offset + n]);
                offset += n;
            }
        }
        assert_eq!(offset, values.len(), "flat parameter length mismatch");
    }

    /// Accumulated gradients laid out like `flat_params`; zeros where a
    /// layer received no gradient.
    pub fn flat_grads(&self) -> Vec<f32> {
        let mut out = Vec::new();
        for &id in self.parameters.iter() {
            let layer = &self.layers[id];
            match layer.pull_grad() {
                Some(grads) => {
                    for g in grads {
                        out.extend_from_slice(g.as_f32_slice());
                    }
                }
                None => {
                    for t in layer.param_tensors() {
                        out.extend(std::iter::repeat(0.0).take(t.len()));
                    }
                }
            }
        }
        out
    }

    pub fn save(&self, dir: &str) -> Result<()> {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir)?;

        for (i, layer) in self.layers.iter().enumerate() {
            layer.save_param(&dir.join(format!("{}.param", i)))?;
        }
        Ok(())
    }

    pub fn load(&mut self, dir: &str) -> Result<()> {
        let dir = PathBuf::from(dir);

        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.load_param(&dir.join(format!("{}.param", i)))?;
        }
        Ok(())
    }
}

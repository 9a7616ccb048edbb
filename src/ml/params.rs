use std::path::Path;

use super::binary_io::*;
use super::funcs::{Identity, NegativeLogLikelihood, ReLU, Sigmoid, Softmax, Tanh};
use super::init::{xavier_init, xiver_vec};
use super::{accumulate, add_updates, Graph, Node, Tensor};
use crate::error::Result;

/// Affine map `y = x W^T + b` over the last axis of the input.
pub struct Linear {
    pub w: Tensor,
    pub b: Tensor,
    pub height: usize,
    pub width: usize,
    pub w_grad: Option<Tensor>,
    pub b_grad: Option<Tensor>,
    pub ignore_grad: bool,
}

impl Linear {
    pub fn new(w: Tensor, b: Tensor) -> Self {
        assert_eq!(w.shape.len(), 2);
        assert_eq!(b.shape.len(), 1);
        assert_eq!(b.shape[0], w.shape[0]);

        let height = w.shape[0];
        let width = w.shape[1];
        Self {
            w,
            b,
            height,
            width,
            w_grad: None,
            b_grad: None,
            ignore_grad: false,
        }
    }

    pub fn auto(input_size: usize, output_size: usize) -> Self {
        let weight = xiver_vec(input_size, output_size * input_size);
        let weight = Tensor::new(weight, vec![output_size, input_size]);
        let b = Tensor::zeros(vec![output_size]);
        Linear::new(weight, b)
    }

    /// Glorot-uniform weights sized for `activation`, zero bias.
    pub fn xavier(input_size: usize, output_size: usize, activation: Activation) -> Self {
        // xavier_init lays out [in, out]; the layer stores [out, in].
        let w_in_out = xavier_init(input_size, output_size, activation);
        let mut w = vec![0.0; input_size * output_size];
        for i in 0..input_size {
            for o in 0..output_size {
                w[o * input_size + i] = w_in_out[i * output_size + o];
            }
        }
        Linear::new(
            Tensor::new(w, vec![output_size, input_size]),
            Tensor::zeros(vec![output_size]),
        )
    }

    /// All-zero weights and bias.
    pub fn zeros(input_size: usize, output_size: usize) -> Self {
        Linear::new(
            Tensor::zeros(vec![output_size, input_size]),
            Tensor::zeros(vec![output_size]),
        )
    }

    pub fn set_ignore(&mut self) {
        self.ignore_grad = true;
    }
}

impl Node for Linear {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let input = inputs[0];
        let in_features = *input.shape.last().unwrap();
        let out_features = self.height;

        // Calculate batch size by flattening all dimensions except the last
        let input_data = input.as_f32_slice();
        let batch = input_data.len() / in_features;

        let mut w_grad = Tensor::zeros_like(&self.w);
        let mut b_grad = Tensor::zeros_like(&self.b);
        let mut input_grad = Tensor::zeros_like(input);

        let grad_data = grad.as_f32_slice();
        let w_data = self.w.as_f32_slice();

        let w_grad_f32 = w_grad.f32_data_mut();
        let b_grad_f32 = b_grad.f32_data_mut();
        let input_grad_f32 = input_grad.f32_data_mut();

        for b in 0..batch {
            let offset_input = b * in_features;
            let offset_grad = b * out_features;
            for i in 0..out_features {
                let gi = grad_data[offset_grad + i];
                b_grad_f32[i] += gi;
                for j in 0..in_features {
                    w_grad_f32[i * in_features + j] += gi * input_data[offset_input + j];
                    input_grad_f32[offset_input + j] += gi * w_data[i * in_features + j];
                }
            }
        }

        accumulate(&mut self.w_grad, w_grad);
        accumulate(&mut self.b_grad, b_grad);

        vec![input_grad]
    }

    fn call(&self, input_vec: Vec<Tensor>) -> Tensor {
        assert_eq!(input_vec.len(), 1);
        let input = &input_vec[0];

        let input_f32 = input.as_f32_slice();
        let in_features = *input.shape.last().unwrap();
        assert_eq!(in_features, self.width);

        // Calculate batch size by flattening all dimensions except the last
        let batch = input_f32.len() / in_features;

        let mut ans_shape = input.shape.clone();
        *ans_shape.last_mut().unwrap() = self.height;
        let mut ans_data = vec![0.0; batch * self.height];
        let w_f32 = self.w.as_f32_slice();
        let b_f32 = self.b.as_f32_slice();

        for b in 0..batch {
            let offset_input = b * in_features;
            let offset_ans = b * self.height;
            for i in 0..self.height {
                let mut sum = b_f32[i];
                for j in 0..in_features {
                    sum += input_f32[offset_input + j] * w_f32[i * in_features + j];
                }
                ans_data[offset_ans + i] = sum;
            }
        }
        Tensor::new(ans_data, ans_shape)
    }

    fn no_grad(&self) -> bool {
        self.ignore_grad
    }

    fn has_params(&self) -> bool {
        !self.ignore_grad
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        Some(vec![self.w_grad.as_ref()?, self.b_grad.as_ref()?])
    }

    fn clear_grad(&mut self) {
        self.w_grad = None;
        self.b_grad = None;
    }

    fn param_tensors(&self) -> Vec<&Tensor> {
        vec![&self.w, &self.b]
    }

    fn param_tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.w, &mut self.b]
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        add_updates(vec![&mut self.w, &mut self.b], &update);
        self.w_grad = None;
        self.b_grad = None;
    }

    fn print(&self) {
        println!("w:{:?}, b:{:?}", self.w, self.b)
    }

    fn save_param(&self, path: &Path) -> Result<()> {
        save_tensors(path, TYPE_LINEAR, &[&self.w, &self.b])?;
        Ok(())
    }

    fn load_param(&mut self, path: &Path) -> Result<()> {
        let mut loaded = load_tensors(path, TYPE_LINEAR, 2)?;
        let b = loaded.pop().unwrap_or_else(Tensor::null);
        let w = loaded.pop().unwrap_or_else(Tensor::null);
        check_shape(&w, &self.w, "linear weight")?;
        check_shape(&b, &self.b, "linear bias")?;
        self.w = w;
        self.b = b;
        Ok(())
    }
}

/// Nonlinearity applied after a dense layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Sigmoid,
    Relu,
    Identity,
}

impl Activation {
    pub fn into_node(self) -> Box<dyn Node> {
        match self {
            Activation::Tanh => Box::new(Tanh::new()),
            Activation::Sigmoid => Box::new(Sigmoid::default()),
            Activation::Relu => Box::new(ReLU::new()),
            Activation::Identity => Box::new(Identity::new()),
        }
    }
}

/// A fully connected layer followed by its activation.
pub struct DenseLayer {
    pub linear: usize,
    pub output: usize,
}

impl DenseLayer {
    /// Appends `Linear(xavier) + activation` after `input`.
    pub fn build(
        g: &mut Graph,
        input: usize,
        n_in: usize,
        n_out: usize,
        activation: Activation,
    ) -> Self {
        let linear = g.add_layer(
            vec![input],
            Box::new(Linear::xavier(n_in, n_out, activation)),
        );
        let output = g.add_layer(vec![linear], activation.into_node());
        DenseLayer { linear, output }
    }
}

/// Multi-class logistic regression: zero-initialised affine map and softmax.
pub struct LogisticRegression {
    pub linear: usize,
    /// Node producing `p(y | x)`.
    pub p_y_given_x: usize,
}

impl LogisticRegression {
    pub fn build(g: &mut Graph, input: usize, n_in: usize, n_out: usize) -> Self {
        let linear = g.add_layer(vec![input], Box::new(Linear::zeros(n_in, n_out)));
        let p_y_given_x = g.add_layer(vec![linear], Box::new(Softmax::new()));
        LogisticRegression {
            linear,
            p_y_given_x,
        }
    }

    /// Adds the mean negative log-likelihood of `labels` and returns its id.
    pub fn loss(&self, g: &mut Graph, labels: usize) -> usize {
        g.add_layer(
            vec![self.p_y_given_x, labels],
            Box::new(NegativeLogLikelihood::new()),
        )
    }
}

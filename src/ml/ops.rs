use super::Node;
use super::Tensor;

/// Flips axis 0 (time for `[T, N, ..]` sequences).
#[derive(Default)]
pub struct Reverse {}

impl Reverse {
    pub fn new() -> Self {
        Reverse {}
    }
}

fn reverse_axis0(t: &Tensor) -> Tensor {
    if t.shape.is_empty() || t.shape[0] == 0 {
        return t.clone();
    }
    let step = t.len() / t.shape[0];
    let mut out = Vec::with_capacity(t.len());
    for chunk in t.as_f32_slice().chunks(step).rev() {
        out.extend_from_slice(chunk);
    }
    Tensor::new(out, t.shape.clone())
}

impl Node for Reverse {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert_eq!(inputs.len(), 1);
        reverse_axis0(&inputs[0])
    }
    fn backward(&mut self, grad: &Tensor, _: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        vec![reverse_axis0(grad)]
    }
}

/// Selects the last entry along axis 0: `[T, ..] -> [..]`.
#[derive(Default)]
pub struct LastStep {}

impl LastStep {
    pub fn new() -> Self {
        LastStep {}
    }
}

impl Node for LastStep {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert_eq!(inputs.len(), 1);
        let input = &inputs[0];
        let steps = input.shape[0];
        assert!(steps > 0, "LastStep on an empty sequence");
        let step = input.len() / steps;
        let start = (steps - 1) * step;

        Tensor::new(
            input.as_f32_slice()[start..].to_vec(),
            input.shape[1..].to_vec(),
        )
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let mut igrad = Tensor::zeros_like(inputs[0]);
        let start = igrad.len() - grad.len();
        igrad.f32_data_mut()[start..].copy_from_slice(grad.as_f32_slice());
        vec![igrad]
    }
}

/// Concatenates inputs along the last axis; leading shapes must agree.
#[derive(Default)]
pub struct Concat {}

impl Concat {
    pub fn new() -> Self {
        Concat {}
    }
}

impl Node for Concat {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert!(!inputs.is_empty());
        let lead = &inputs[0].shape[..inputs[0].shape.len() - 1];
        let rows: usize = lead.iter().product();
        let widths: Vec<usize> = inputs
            .iter()
            .map(|t| {
                assert_eq!(
                    &t.shape[..t.shape.len() - 1],
                    lead,
                    "concat leading shapes differ"
                );
                *t.shape.last().unwrap()
            })
            .collect();
        let total: usize = widths.iter().sum();

        let mut out = Vec::with_capacity(rows * total);
        for r in 0..rows {
            for (t, &w) in inputs.iter().zip(widths.iter()) {
                out.extend_from_slice(&t.as_f32_slice()[r * w..(r + 1) * w]);
            }
        }
        let mut shape = lead.to_vec();
        shape.push(total);
        Tensor::new(out, shape)
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let total = *grad.shape.last().unwrap();
        let rows = grad.len() / total;
        let g = grad.as_f32_slice();

        let mut offset = 0;
        let mut grads = Vec::with_capacity(inputs.len());
        for input in inputs {
            let w = *input.shape.last().unwrap();
            let mut data = Vec::with_capacity(rows * w);
            for r in 0..rows {
                data.extend_from_slice(&g[r * total + offset..r * total + offset + w]);
            }
            grads.push(Tensor::new(data, input.shape.clone()));
            offset += w;
        }
        grads
    }
}

/// Multiplies `x [T, N, ..]` by `mask [T, N]`, broadcasting over the
/// trailing axes. The mask receives no gradient.
#[derive(Default)]
pub struct ApplyMask {}

impl ApplyMask {
    pub fn new() -> Self {
        ApplyMask {}
    }
}

fn mask_rows(x: &[f32], mask: &[f32]) -> Vec<f32> {
    let width = x.len() / mask.len();
    let mut out = Vec::with_capacity(x.len());
    for (row, &m) in x.chunks(width).zip(mask.iter()) {
        out.extend(row.iter().map(|v| v * m));
    }
    out
}

impl Node for ApplyMask {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert_eq!(inputs.len(), 2);
        let (x, mask) = (&inputs[0], &inputs[1]);
        assert!(
            x.shape.starts_with(&mask.shape),
            "mask shape {:?} does not prefix {:?}",
            mask.shape,
            x.shape
        );
        Tensor::new(mask_rows(x.as_f32_slice(), mask.as_f32_slice()), x.shape.clone())
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let mask = inputs[1];
        vec![
            Tensor::new(mask_rows(grad.as_f32_slice(), mask.as_f32_slice()), grad.shape.clone()),
            Tensor::zeros_like(mask),
        ]
    }
}

/// Collapses every axis from `start_dim` onwards into one.
pub struct Flatten {
    start_dim: usize,
}

impl Flatten {
    pub fn new(start_dim: usize) -> Self {
        Flatten { start_dim }
    }
}

impl Node for Flatten {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert_eq!(inputs.len(), 1);
        let input = &inputs[0];
        assert!(self.start_dim < input.shape.len());
        let mut shape = input.shape[..self.start_dim].to_vec();
        shape.push(input.shape[self.start_dim..].iter().product());
        Tensor::new(input.as_f32_slice().to_vec(), shape)
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad.as_f32_slice().to_vec(), inputs[0].shape.clone())]
    }
}

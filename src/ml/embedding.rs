use std::path::Path;

use super::binary_io::*;
use super::{accumulate, add_updates, Node, Tensor};
use crate::error::Result;

/// Lookup table mapping integer ids to rows of `table [V, E]`.
///
/// The input holds ids of any shape `S` (as f32); the output has shape
/// `S + [E]`.
pub struct Embedding {
    pub table: Tensor,
    pub grad: Option<Tensor>,
    pub ignore_grad: bool,
}

impl Embedding {
    pub fn new(table: Tensor) -> Self {
        assert_eq!(table.shape.len(), 2, "embedding table must be [V, E]");
        Self {
            table,
            grad: None,
            ignore_grad: false,
        }
    }

    pub fn n_words(&self) -> usize {
        self.table.shape[0]
    }

    pub fn dim(&self) -> usize {
        self.table.shape[1]
    }

    pub fn set_ignore(&mut self) {
        self.ignore_grad = true;
    }

    /// Rows for `ids`, concatenated.
    pub fn lookup(&self, ids: &[usize]) -> Vec<f32> {
        let dim = self.dim();
        let table = self.table.as_f32_slice();
        let mut out = Vec::with_capacity(ids.len() * dim);
        for &id in ids {
            assert!(
                id < self.n_words(),
                "word id {} out of range for vocabulary of {}",
                id,
                self.n_words()
            );
            out.extend_from_slice(&table[id * dim..(id + 1) * dim]);
        }
        out
    }
}

impl Node for Embedding {
    fn call(&self, inputs: Vec<Tensor>) -> Tensor {
        assert_eq!(inputs.len(), 1);
        let ids = inputs[0].to_ids();
        let mut shape = inputs[0].shape.clone();
        shape.push(self.dim());
        Tensor::new(self.lookup(&ids), shape)
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let dim = self.dim();
        let mut table_grad = Tensor::zeros_like(&self.table);
        {
            let tg = table_grad.f32_data_mut();
            let g = grad.as_f32_slice();
            for (k, id) in inputs[0].to_ids().into_iter().enumerate() {
                for j in 0..dim {
                    tg[id * dim + j] += g[k * dim + j];
                }
            }
        }
        accumulate(&mut self.grad, table_grad);

        vec![Tensor::zeros_like(inputs[0])]
    }

    fn no_grad(&self) -> bool {
        self.ignore_grad
    }

    fn has_params(&self) -> bool {
        !self.ignore_grad
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        self.grad.as_ref().map(|g| vec![g])
    }

    fn clear_grad(&mut self) {
        self.grad = None;
    }

    fn param_tensors(&self) -> Vec<&Tensor> {
        vec![&self.table]
    }

    fn param_tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.table]
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        add_updates(vec![&mut self.table], &update);
        self.grad = None;
    }

    fn print(&self) {
        println!("table:{:?}", self.table)
    }

    fn save_param(&self, path: &Path) -> Result<()> {
        save_tensors(path, TYPE_EMBEDDING, &[&self.table])?;
        Ok(())
    }

    fn load_param(&mut self, path: &Path) -> Result<()> {
        let mut loaded = load_tensors(path, TYPE_EMBEDDING, 1)?;
        let table = loaded.remove(0);
        check_shape(&table, &self.table, "embedding table")?;
        self.table = table;
        Ok(())
    }
}

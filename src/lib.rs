#![allow(missing_docs)]
//! Neural network building blocks over a small autodiff graph.
//!
//! `cutils` provides the pieces needed to train word-level sequence
//! models on the CPU:
//!
//! - Tensors, a computational graph with reverse-mode differentiation
//! - Embedding dictionaries, LSTM recurrence with sequence masking,
//!   dense and softmax layers
//! - SGD (plain and norm-clipped), Adadelta, RMSProp and nonlinear
//!   conjugate gradient
//! - Corpus loaders and three training programs: MNIST logistic
//!   regression, an n-gram neural language model and an LSTM
//!   encoder-decoder
//!
//! # Features
//!
//! - `logging`: TensorBoard scalars during training (adds `tensorboard-rs`, `chrono`)
//! - `progress`: progress bars during training (adds `indicatif`)
//! - `full`: all of the above
//!
//! # Usage Example
//!
//! ```ignore
//! use cutils::ml::lstm::Lstm;
//! use cutils::ml::{Graph, Tensor};
//!
//! let mut g = Graph::new();
//! let x = g.push_placeholder();
//! let mask = g.push_placeholder();
//! let h = g.add_layer(vec![x, mask], Box::new(Lstm::new(8, 4)));
//! g.set_target(h);
//! g.set_placeholder(vec![x, mask]);
//!
//! // three steps, two samples
//! let states = g.forward(vec![Tensor::zeros(vec![3, 2, 4]), Tensor::ones(vec![3, 2])]);
//! assert_eq!(states.shape, vec![3, 2, 8]);
//! ```

// lets `#[derive(Stackable)]` name `::cutils` from inside this crate
extern crate self as cutils;

/// Training program configuration.
pub mod config;
/// Data loaders for MNIST, n-gram and parallel corpora.
pub mod corpus;
/// Dataset utilities for loading and batching data.
pub mod dataset;
/// Vocabulary and word embeddings.
pub mod dict;
/// Error types.
pub mod error;
/// Core machine learning primitives including tensors, graphs, and layers.
pub mod ml;
/// Logistic regression, NPLM and encoder-decoder training.
pub mod models;
/// Padding and minibatching for variable-length sequences.
pub mod sequence;
/// Utility functions for random number generation.
pub mod utills;

pub use error::{CutilsError, Result};

#[cfg(test)]
mod test;

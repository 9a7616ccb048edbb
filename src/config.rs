//! Configuration for the training programs.
//!
//! Every struct deserialises from JSON with missing fields taking their
//! defaults, so a config file only needs the values it changes.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CutilsError, Result};

/// Loads `T` from a JSON file, or returns the defaults without one.
pub fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => {
            let reader = BufReader::new(File::open(path)?);
            Ok(serde_json::from_reader(reader)?)
        }
        None => Ok(T::default()),
    }
}

/// Update rule used by the sequence models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adadelta,
    Rmsprop,
    Sgd,
}

/// How the logistic regression is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogisticMethod {
    /// Minibatch SGD with early stopping.
    Sgd,
    /// Full-batch conjugate gradient.
    Cg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    pub learning_rate: f32,
    pub n_epochs: usize,
    pub batch_size: usize,
    pub patience: usize,
    pub patience_increase: usize,
    pub improvement_threshold: f32,
    pub method: LogisticMethod,
    pub cg_max_iter: usize,
    pub train_path: PathBuf,
    pub valid_path: PathBuf,
    pub test_path: PathBuf,
    /// Where the best model is written; `None` skips saving.
    pub model_dir: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        LogisticConfig {
            learning_rate: 0.13,
            n_epochs: 1000,
            batch_size: 600,
            patience: 5000,
            patience_increase: 2,
            improvement_threshold: 0.995,
            method: LogisticMethod::Sgd,
            cg_max_iter: 50,
            train_path: PathBuf::from("data/mnist_train.csv"),
            valid_path: PathBuf::from("data/mnist_valid.csv"),
            test_path: PathBuf::from("data/mnist_test.csv"),
            model_dir: Some(PathBuf::from("best_model")),
            seed: None,
        }
    }
}

impl LogisticConfig {
    pub fn validate(&self) -> Result<()> {
        positive("batch_size", self.batch_size)?;
        positive("patience", self.patience)?;
        if !(self.learning_rate > 0.0) {
            return Err(CutilsError::Config("learning_rate must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NplmConfig {
    pub learning_rate: f32,
    pub n_epochs: usize,
    pub dataset: PathBuf,
    pub batch_size: usize,
    /// Word embedding width.
    pub n_in: usize,
    pub n_h1: usize,
    pub n_h2: usize,
    pub context_size: usize,
    pub n_words: usize,
    pub valid_fraction: f32,
    /// Gradients are rescaled so their global norm stays below this.
    pub clip_norm: f32,
    pub disp_freq: usize,
    pub progress: bool,
    pub model_dir: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for NplmConfig {
    fn default() -> Self {
        NplmConfig {
            learning_rate: 1.0,
            n_epochs: 1000,
            dataset: PathBuf::from("data/settimes"),
            batch_size: 1000,
            n_in: 150,
            n_h1: 750,
            n_h2: 150,
            context_size: 4,
            n_words: 10000,
            valid_fraction: 0.1,
            clip_norm: 5.0,
            disp_freq: 10,
            progress: false,
            model_dir: None,
            seed: None,
        }
    }
}

impl NplmConfig {
    pub fn validate(&self) -> Result<()> {
        positive("batch_size", self.batch_size)?;
        positive("context_size", self.context_size)?;
        positive("n_in", self.n_in)?;
        positive("disp_freq", self.disp_freq)?;
        fraction("valid_fraction", self.valid_fraction)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncDecConfig {
    pub dim_proj: usize,
    pub n_words_src: usize,
    pub n_words_tgt: usize,
    pub batch_size: usize,
    pub valid_batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without a better validation cost before stopping.
    pub patience: usize,
    pub optimizer: OptimizerKind,
    /// Used by SGD only; Adadelta and RMSProp ignore it.
    pub lrate: f32,
    /// SGD rescales gradients whose global norm exceeds this.
    pub clip_norm: f32,
    pub use_dropout: bool,
    pub disp_freq: usize,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub valid_fraction: f32,
    pub progress: bool,
    pub model_dir: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for EncDecConfig {
    fn default() -> Self {
        EncDecConfig {
            dim_proj: 128,
            n_words_src: 10000,
            n_words_tgt: 10000,
            batch_size: 16,
            valid_batch_size: 64,
            max_epochs: 100,
            patience: 10,
            optimizer: OptimizerKind::Adadelta,
            lrate: 0.0001,
            clip_norm: 5.0,
            use_dropout: true,
            disp_freq: 10,
            source_path: PathBuf::from("data/train.src"),
            target_path: PathBuf::from("data/train.tgt"),
            valid_fraction: 0.05,
            progress: false,
            model_dir: None,
            seed: Some(123),
        }
    }
}

impl EncDecConfig {
    pub fn validate(&self) -> Result<()> {
        positive("dim_proj", self.dim_proj)?;
        positive("batch_size", self.batch_size)?;
        positive("valid_batch_size", self.valid_batch_size)?;
        positive("disp_freq", self.disp_freq)?;
        if !(self.clip_norm > 0.0) {
            return Err(CutilsError::Config("clip_norm must be positive".into()));
        }
        fraction("valid_fraction", self.valid_fraction)
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(CutilsError::Config(format!("{} must be positive", name)));
    }
    Ok(())
}

fn fraction(name: &str, value: f32) -> Result<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(CutilsError::Config(format!("{} must be in [0, 1)", name)));
    }
    Ok(())
}

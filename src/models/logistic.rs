use std::path::Path;

use tracing::info;

use super::RunLog;
use crate::config::{LogisticConfig, LogisticMethod};
use crate::corpus::{MnistSplit, MNIST_PIXELS};
use crate::error::{check_cost, CutilsError, Result};
use crate::ml::early_stopping::EarlyStopping;
use crate::ml::metrics;
use crate::ml::optim::{conjugate_gradient, SGD};
use crate::ml::params::LogisticRegression;
use crate::ml::{Graph, Tensor};

pub const N_CLASSES: usize = 10;

/// Softmax regression `p(y | x) = softmax(x W^T + b)` with zero-initialised
/// parameters.
pub struct LogisticModel {
    graph: Graph,
    x: usize,
    y: usize,
    p_y_given_x: usize,
    cost: usize,
}

impl LogisticModel {
    pub fn new(n_in: usize, n_out: usize, learning_rate: f32) -> Self {
        let mut g = Graph::new();
        let x = g.push_placeholder();
        let y = g.push_placeholder();
        let classifier = LogisticRegression::build(&mut g, x, n_in, n_out);
        let cost = classifier.loss(&mut g, y);

        g.set_optimizer(SGD::new(learning_rate));
        g.set_target(cost);
        g.set_placeholder(vec![x, y]);
        g.set_train_mode();

        LogisticModel {
            graph: g,
            x,
            y,
            p_y_given_x: classifier.p_y_given_x,
            cost,
        }
    }

    /// Forward, backward and one parameter update; returns the cost.
    pub fn train_step(&mut self, x: Tensor, y: Tensor) -> Result<f32> {
        let cost = self.cost_and_grad(x, y)?;
        self.graph.optimize();
        Ok(cost)
    }

    /// Leaves the gradients accumulated in the graph.
    fn cost_and_grad(&mut self, x: Tensor, y: Tensor) -> Result<f32> {
        self.graph.zero_grad();
        let out = self.graph.forward(vec![x, y]);
        let cost = out.get_item().unwrap_or(f32::NAN);
        self.graph.backward();
        self.graph.reset();
        check_cost(cost)
    }

    /// Class probabilities `[B, n_out]`.
    pub fn predict_proba(&mut self, x: Tensor) -> Tensor {
        self.graph.set_target(self.p_y_given_x);
        self.graph.set_placeholder(vec![self.x]);
        let out = self.graph.inference(vec![x]);
        self.graph.set_target(self.cost);
        self.graph.set_placeholder(vec![self.x, self.y]);
        out
    }

    pub fn predict(&mut self, x: Tensor) -> Vec<usize> {
        let p = self.predict_proba(x);
        p.argmax(Some(1)).to_ids()
    }

    /// Mean of the per-batch error rates over the full batches of `split`.
    /// A trailing partial batch is not scored; a split shorter than one
    /// batch is scored as a single batch.
    pub fn error_rate(&mut self, split: &MnistSplit, batch_size: usize) -> f32 {
        if split.is_empty() {
            return 0.0;
        }
        let n_batches = split.len() / batch_size;
        if n_batches == 0 {
            let all: Vec<usize> = (0..split.len()).collect();
            let (x, y) = split.batch(&all);
            let p = self.predict_proba(x);
            return metrics::zero_one_loss(&p, &y);
        }
        let mut total = 0.0;
        for b in 0..n_batches {
            let idx: Vec<usize> = (b * batch_size..(b + 1) * batch_size).collect();
            let (x, y) = split.batch(&idx);
            let p = self.predict_proba(x);
            total += metrics::zero_one_loss(&p, &y);
        }
        total / n_batches as f32
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.graph.save(&dir.to_string_lossy())
    }

    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.graph.load(&dir.to_string_lossy())
    }

    pub fn params(&self) -> Vec<f32> {
        self.graph.flat_params()
    }

    /// Cost and flat gradient at `params` over one batch.
    pub fn objective(&mut self, params: &[f32], x: Tensor, y: Tensor) -> (f32, Vec<f32>) {
        self.graph.set_flat_params(params);
        match self.cost_and_grad(x, y) {
            Ok(cost) => (cost, self.graph.flat_grads()),
            Err(_) => (f32::INFINITY, vec![0.0; params.len()]),
        }
    }
}

pub struct MnistData {
    pub train: MnistSplit,
    pub valid: MnistSplit,
    pub test: MnistSplit,
}

impl MnistData {
    pub fn load(config: &LogisticConfig) -> Result<Self> {
        Ok(MnistData {
            train: MnistSplit::from_csv(&config.train_path)?,
            valid: MnistSplit::from_csv(&config.valid_path)?,
            test: MnistSplit::from_csv(&config.test_path)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogisticReport {
    pub best_validation_error: f32,
    pub test_error: f32,
    pub best_iter: Option<usize>,
    pub epochs: usize,
    /// Parameter updates, or conjugate gradient iterations.
    pub updates: usize,
}

pub fn train(config: &LogisticConfig, data: &MnistData) -> Result<(LogisticModel, LogisticReport)> {
    config.validate()?;
    match config.method {
        LogisticMethod::Sgd => train_sgd(config, data),
        LogisticMethod::Cg => train_cg(config, data),
    }
}

/// Minibatch SGD with patience-based early stopping. The test error is
/// measured whenever the validation error reaches a new best.
pub fn train_sgd(
    config: &LogisticConfig,
    data: &MnistData,
) -> Result<(LogisticModel, LogisticReport)> {
    let batch_size = config.batch_size;
    let n_train_batches = data.train.len() / batch_size;
    if n_train_batches == 0 {
        return Err(CutilsError::Config(format!(
            "{} training samples do not fill one batch of {}",
            data.train.len(),
            batch_size
        )));
    }

    info!("building the model");
    let mut model = LogisticModel::new(MNIST_PIXELS, N_CLASSES, config.learning_rate);
    let mut stopper = EarlyStopping::new(
        config.patience,
        config.patience_increase,
        config.improvement_threshold,
        n_train_batches,
    );
    let mut log = RunLog::new("logreg");

    info!("training the model");
    let mut test_error = f32::NAN;
    let mut epoch = 0;
    let mut done_looping = false;
    while epoch < config.n_epochs && !done_looping {
        epoch += 1;
        for minibatch_index in 0..n_train_batches {
            let idx: Vec<usize> =
                (minibatch_index * batch_size..(minibatch_index + 1) * batch_size).collect();
            let (x, y) = data.train.batch(&idx);
            let cost = model.train_step(x, y)?;

            let iter = (epoch - 1) * n_train_batches + minibatch_index;
            log.scalar("train/cost", iter, cost);

            if stopper.should_validate(iter) {
                let valid_error = model.error_rate(&data.valid, batch_size);
                log.scalar("valid/error", iter, valid_error);
                info!(
                    epoch,
                    minibatch = minibatch_index + 1,
                    n_train_batches,
                    "validation error {:.6} %",
                    valid_error * 100.0
                );

                if stopper.observe(iter, valid_error) {
                    test_error = model.error_rate(&data.test, batch_size);
                    info!(
                        epoch,
                        minibatch = minibatch_index + 1,
                        "test error of best model {:.6} %",
                        test_error * 100.0
                    );
                    if let Some(dir) = &config.model_dir {
                        model.save(dir)?;
                    }
                }
            }
        }

        // patience is checked once the epoch is through
        let last_iter = epoch * n_train_batches - 1;
        if stopper.should_stop(last_iter) {
            done_looping = true;
        }
    }

    let report = LogisticReport {
        best_validation_error: stopper.best_loss(),
        test_error,
        best_iter: stopper.best_iter(),
        epochs: epoch,
        updates: epoch * n_train_batches,
    };
    info!(
        epochs = report.epochs,
        "optimization complete, best validation error {:.6} %, test error {:.6} %",
        report.best_validation_error * 100.0,
        report.test_error * 100.0
    );
    Ok((model, report))
}

/// Full-batch conjugate gradient on the training cost, keeping the
/// iterate with the lowest validation error.
pub fn train_cg(config: &LogisticConfig, data: &MnistData) -> Result<(LogisticModel, LogisticReport)> {
    if data.train.is_empty() {
        return Err(CutilsError::Config("no training samples".into()));
    }
    let mut model = LogisticModel::new(MNIST_PIXELS, N_CLASSES, config.learning_rate);
    let all: Vec<usize> = (0..data.train.len()).collect();
    let (x, y) = data.train.batch(&all);
    let x0 = model.params();

    let mut eval = LogisticModel::new(MNIST_PIXELS, N_CLASSES, config.learning_rate);
    let mut best = (f32::INFINITY, x0.clone(), None);
    let mut iter = 0;
    let result = conjugate_gradient(
        |p| model.objective(p, x.clone(), y.clone()),
        x0,
        config.cg_max_iter,
        |p| {
            eval.graph.set_flat_params(p);
            let valid_error = eval.error_rate(&data.valid, config.batch_size);
            info!(iteration = iter, "validation error {:.6} %", valid_error * 100.0);
            if valid_error < best.0 {
                best = (valid_error, p.to_vec(), Some(iter));
            }
            iter += 1;
        },
    );
    info!(
        iterations = result.iterations,
        converged = result.converged,
        cost = result.cost,
        "conjugate gradient finished"
    );

    let (best_validation_error, best_params, best_iter) = best;
    model.graph.set_flat_params(&best_params);
    let test_error = model.error_rate(&data.test, config.batch_size);
    if let Some(dir) = &config.model_dir {
        model.save(dir)?;
    }

    Ok((
        model,
        LogisticReport {
            best_validation_error,
            test_error,
            best_iter,
            epochs: result.iterations,
            updates: result.iterations,
        },
    ))
}

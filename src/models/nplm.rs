use std::path::Path;

use tracing::{info, warn};

use super::RunLog;
use crate::config::NplmConfig;
use crate::corpus::{NgramCorpus, Ngrams};
use crate::dataset::Dataloader;
use crate::dict::Dict;
use crate::error::{check_cost, Result};
use crate::ml::ops::Flatten;
use crate::ml::optim::ClippedSGD;
use crate::ml::params::{Activation, DenseLayer, LogisticRegression};
use crate::ml::progress::TrainingProgress;
use crate::ml::{Graph, Tensor};
use crate::sequence::minibatch_indices;

/// Neural probabilistic language model.
///
/// The embeddings of `context_size` preceding words are concatenated and
/// passed through two ReLU layers into a softmax over the vocabulary.
pub struct Nplm {
    graph: Graph,
    context: usize,
    y: usize,
    p_y_given_x: usize,
    pub embedding: usize,
}

impl Nplm {
    pub fn new(
        dict: &Dict,
        context_size: usize,
        n_h1: usize,
        n_h2: usize,
        learning_rate: f32,
        clip_norm: f32,
    ) -> Self {
        let n_in = context_size * dict.emb_dim();
        let mut g = Graph::new();
        let context = g.push_placeholder();
        let y = g.push_placeholder();

        let embedding = g.add_layer(vec![context], Box::new(dict.embedding()));
        let emb_x = g.add_layer(vec![embedding], Box::new(Flatten::new(1)));
        let h1 = DenseLayer::build(&mut g, emb_x, n_in, n_h1, Activation::Relu);
        let h2 = DenseLayer::build(&mut g, h1.output, n_h1, n_h2, Activation::Relu);
        let out = LogisticRegression::build(&mut g, h2.output, n_h2, dict.num_words());
        let cost = out.loss(&mut g, y);

        g.set_optimizer(ClippedSGD::with_rescale(learning_rate, clip_norm));
        g.set_target(cost);
        g.set_placeholder(vec![context, y]);
        g.set_train_mode();

        Nplm {
            graph: g,
            context,
            y,
            p_y_given_x: out.p_y_given_x,
            embedding,
        }
    }

    pub fn train_step(&mut self, context: Tensor, y: Tensor) -> Result<f32> {
        let out = self.graph.forward(vec![context, y]);
        let cost = match check_cost(out.get_item().unwrap_or(f32::NAN)) {
            Ok(cost) => cost,
            Err(err) => {
                self.graph.reset();
                return Err(err);
            }
        };
        self.graph.backward();
        self.graph.optimize();
        self.graph.reset();
        Ok(cost)
    }

    /// Mean cost over `data` without updating anything.
    pub fn pred_cost(&self, data: &Ngrams, batch_size: usize) -> f32 {
        let mut total = 0.0;
        for idx in minibatch_indices(data.len(), batch_size, false) {
            let (x, y) = data.batch(&idx);
            let cost = self.graph.inference(vec![x, y]).get_item().unwrap_or(f32::NAN);
            total += cost * idx.len() as f32;
        }
        if data.is_empty() {
            0.0
        } else {
            total / data.len() as f32
        }
    }

    /// Next-word distribution `[B, V]` for contexts `[B, context_size]`.
    pub fn predict_proba(&mut self, context: Tensor) -> Tensor {
        let target = self.graph.target;
        self.graph.set_target(self.p_y_given_x);
        self.graph.set_placeholder(vec![self.context]);
        let out = self.graph.inference(vec![context]);
        self.graph.set_target(target);
        self.graph.set_placeholder(vec![self.context, self.y]);
        out
    }

    /// The trained word embeddings.
    pub fn wemb(&self) -> Option<&Tensor> {
        self.graph.layers[self.embedding]
            .param_tensors()
            .into_iter()
            .next()
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.graph.save(&dir.to_string_lossy())
    }

    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.graph.load(&dir.to_string_lossy())
    }
}

#[derive(Debug, Clone)]
pub struct NplmReport {
    pub updates: usize,
    pub last_cost: f32,
    pub valid_cost: f32,
}

/// Trains on a corpus; a NaN or infinite cost aborts with `BadCost`.
pub fn train(config: &NplmConfig, corpus: &NgramCorpus) -> Result<(Nplm, NplmReport)> {
    config.validate()?;
    info!("building the model");
    let mut model = Nplm::new(
        &corpus.dictionary,
        config.context_size,
        config.n_h1,
        config.n_h2,
        config.learning_rate,
        config.clip_norm,
    );

    info!(
        train = corpus.train.len(),
        valid = corpus.valid.len(),
        "optimization"
    );
    let loader = Dataloader::new(corpus.train.clone(), config.batch_size, false);
    let mut progress = config
        .progress
        .then(|| TrainingProgress::new(config.n_epochs, loader.n_batches()));
    let mut log = RunLog::new("nplm");

    let mut uidx = 0;
    let mut last_cost = f32::NAN;
    let mut valid_cost = f32::NAN;
    for eidx in 0..config.n_epochs {
        if let Some(p) = progress.as_mut() {
            p.start_epoch();
        }
        let mut epoch_cost = 0.0;
        let mut n_batches = 0;
        for batch in loader.iter_batch() {
            uidx += 1;
            let cost = match model.train_step(batch.context, batch.target) {
                Ok(cost) => cost,
                Err(err) => {
                    warn!(%err, epoch = eidx, update = uidx, "aborting training");
                    return Err(err);
                }
            };
            last_cost = cost;
            epoch_cost += cost;
            n_batches += 1;
            log.scalar("train/cost", uidx, cost);
            if let Some(p) = progress.as_mut() {
                p.update_batch(cost);
            }
            if uidx % config.disp_freq == 0 {
                info!(epoch = eidx, update = uidx, cost, "training");
            }
        }

        valid_cost = model.pred_cost(&corpus.valid, config.batch_size);
        log.scalar("valid/cost", uidx, valid_cost);
        let mean_cost = epoch_cost / n_batches.max(1) as f32;
        match progress.as_mut() {
            Some(p) => p.finish_epoch(valid_cost, mean_cost),
            None => info!(epoch = eidx, valid_cost, mean_cost, "epoch finished"),
        }
        if let Some(dir) = &config.model_dir {
            model.save(dir)?;
        }
    }

    Ok((
        model,
        NplmReport {
            updates: uidx,
            last_cost,
            valid_cost,
        },
    ))
}

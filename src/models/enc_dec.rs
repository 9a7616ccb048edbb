use std::path::Path;

use tracing::{info, warn};

use super::{build_optimizer, RunLog};
use crate::config::EncDecConfig;
use crate::corpus::{ParallelCorpus, SentencePair};
use crate::dict::Dict;
use crate::error::{check_cost, Result};
use crate::ml::funcs::{Dropout, NegativeLogLikelihood, Softmax};
use crate::ml::lstm::{Feedback, Lstm};
use crate::ml::ops::{ApplyMask, Concat, LastStep, Reverse};
use crate::ml::params::Linear;
use crate::ml::progress::TrainingProgress;
use crate::ml::{Graph, Tensor};
use crate::sequence::{minibatch_indices, pad_and_mask};
use crate::utills::rand::get_random_normal;

/// One padded training batch, time-major.
pub struct EncDecBatch {
    pub x: Tensor,
    pub mask_x: Tensor,
    pub y: Tensor,
    pub mask_y: Tensor,
}

impl EncDecBatch {
    pub fn from_pairs(pairs: &[SentencePair], idx: &[usize]) -> Self {
        let sources: Vec<Vec<usize>> = idx.iter().map(|&i| pairs[i].0.clone()).collect();
        let targets: Vec<Vec<usize>> = idx.iter().map(|&i| pairs[i].1.clone()).collect();
        let src = pad_and_mask(&sources);
        let tgt = pad_and_mask(&targets);
        EncDecBatch {
            x: src.x,
            mask_x: src.mask,
            y: tgt.x,
            mask_y: tgt.mask,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.x.shape[1]
    }
}

fn small_normal(rows: usize, cols: usize) -> Tensor {
    Tensor::new(get_random_normal(rows * cols, 0.0, 0.01), vec![rows, cols])
}

/// Encoder-decoder over LSTMs.
///
/// A forward and a backward LSTM read the source embeddings; their last
/// hidden states are concatenated and projected to a context vector that
/// the decoder LSTM consumes at every target step. Decoder states are
/// masked and mapped through `U_y, b_y` to a softmax over the target
/// vocabulary.
pub struct EncoderDecoder {
    graph: Graph,
    x: usize,
    mask_x: usize,
    y: usize,
    mask_y: usize,
    pred: usize,
    cost: usize,
    pub dim_proj: usize,
    pub ydim: usize,
}

impl EncoderDecoder {
    pub fn new(dim_proj: usize, ydim: usize, source_dict: &Dict, use_dropout: bool) -> Self {
        assert_eq!(
            source_dict.emb_dim(),
            dim_proj,
            "source embeddings must be dim_proj wide"
        );
        let mut g = Graph::new();
        let x = g.push_placeholder();
        let mask_x = g.push_placeholder();
        let y = g.push_placeholder();
        let mask_y = g.push_placeholder();

        let emb = g.add_layer(vec![x], Box::new(source_dict.embedding()));
        let emb_b = g.add_layer(vec![emb], Box::new(Reverse::new()));
        let mask_b = g.add_layer(vec![mask_x], Box::new(Reverse::new()));

        let enc_f = Lstm::new(dim_proj, dim_proj).with_prefix("lstm_enc_f");
        let enc_b = Lstm::new(dim_proj, dim_proj).with_prefix("lstm_enc_b");
        let proj_f = g.add_layer(vec![emb, mask_x], Box::new(enc_f));
        let proj_b = g.add_layer(vec![emb_b, mask_b], Box::new(enc_b));
        let last_f = g.add_layer(vec![proj_f], Box::new(LastStep::new()));
        let last_b = g.add_layer(vec![proj_b], Box::new(LastStep::new()));

        let mut proj = g.add_layer(vec![last_f, last_b], Box::new(Concat::new()));
        if use_dropout {
            proj = g.add_layer(vec![proj], Box::new(Dropout::new()));
        }
        let context = Linear::new(
            small_normal(dim_proj, 2 * dim_proj),
            Tensor::zeros(vec![dim_proj]),
        );
        let context = g.add_layer(vec![proj], Box::new(context));

        let dec = Lstm::new(dim_proj, dim_proj)
            .with_prefix("lstm_dec")
            .with_feedback(Feedback::Context);
        let proj_y = g.add_layer(vec![mask_y, context], Box::new(dec));
        let mut proj_y = g.add_layer(vec![proj_y, mask_y], Box::new(ApplyMask::new()));
        if use_dropout {
            proj_y = g.add_layer(vec![proj_y], Box::new(Dropout::new()));
        }

        let out = Linear::new(small_normal(ydim, dim_proj), Tensor::zeros(vec![ydim]));
        let pre_s = g.add_layer(vec![proj_y], Box::new(out));
        let pred = g.add_layer(vec![pre_s], Box::new(Softmax::new()));
        let cost = g.add_layer(vec![pred, y], Box::new(NegativeLogLikelihood::new()));

        g.set_target(cost);
        g.set_placeholder(vec![x, mask_x, y, mask_y]);
        g.set_train_mode();

        EncoderDecoder {
            graph: g,
            x,
            mask_x,
            y,
            mask_y,
            pred,
            cost,
            dim_proj,
            ydim,
        }
    }

    pub fn set_optimizer(&mut self, optimizer: Box<dyn crate::ml::Optimizer>) {
        self.graph.optimizer = Some(optimizer);
    }

    pub fn train_step(&mut self, batch: &EncDecBatch) -> Result<f32> {
        let out = self.graph.forward(vec![
            batch.x.clone(),
            batch.mask_x.clone(),
            batch.y.clone(),
            batch.mask_y.clone(),
        ]);
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

    /// Cost of one batch with dropout in inference mode.
    pub fn cost(&mut self, batch: &EncDecBatch) -> f32 {
        self.graph.set_inference_mode();
        let out = self.graph.inference(vec![
            batch.x.clone(),
            batch.mask_x.clone(),
            batch.y.clone(),
            batch.mask_y.clone(),
        ]);
        self.graph.set_train_mode();
        out.get_item().unwrap_or(f32::NAN)
    }

    /// Mean cost over `data`, each batch weighted by its sample count.
    pub fn pred_cost(&mut self, data: &[SentencePair], batch_size: usize) -> f32 {
        let mut weighted = 0.0;
        let mut seen = 0;
        for idx in minibatch_indices(data.len(), batch_size, false) {
            let batch = EncDecBatch::from_pairs(data, &idx);
            weighted += self.cost(&batch) * idx.len() as f32;
            seen += idx.len();
        }
        if seen == 0 {
            0.0
        } else {
            weighted / seen as f32
        }
    }

    /// Greedy decoding: runs the decoder for `n_steps` and returns the
    /// argmax target ids `[n_steps, N]`.
    pub fn decode(&mut self, x: Tensor, mask: Tensor, n_steps: usize) -> Tensor {
        let n = x.shape[1];
        self.graph.set_inference_mode();
        self.graph.set_target(self.pred);
        self.graph.set_placeholder(vec![self.x, self.mask_x, self.mask_y]);

        let pred = self
            .graph
            .inference(vec![x, mask, Tensor::ones(vec![n_steps, n])]);

        self.graph.set_target(self.cost);
        self.graph
            .set_placeholder(vec![self.x, self.mask_x, self.y, self.mask_y]);
        self.graph.set_train_mode();
        pred.argmax(Some(2))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.graph.save(&dir.to_string_lossy())
    }

    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.graph.load(&dir.to_string_lossy())
    }
}

#[derive(Debug, Clone)]
pub struct EncDecReport {
    pub epochs: usize,
    pub updates: usize,
    pub last_cost: f32,
    pub best_valid_cost: f32,
}

/// Trains until `max_epochs` or until the validation cost has not
/// improved for `patience` epochs.
pub fn train(
    config: &EncDecConfig,
    corpus: &ParallelCorpus,
) -> Result<(EncoderDecoder, EncDecReport)> {
    config.validate()?;
    info!("building the model");
    let mut model = EncoderDecoder::new(
        config.dim_proj,
        corpus.target_dict.num_words(),
        &corpus.source_dict,
        config.use_dropout,
    );
    model.set_optimizer(build_optimizer(config.optimizer, config.lrate, config.clip_norm));

    let n_batches = corpus.train.len().div_ceil(config.batch_size);
    let mut progress = config
        .progress
        .then(|| TrainingProgress::new(config.max_epochs, n_batches));
    let mut log = RunLog::new("enc-dec");
    info!(
        train = corpus.train.len(),
        valid = corpus.valid.len(),
        optimizer = ?config.optimizer,
        "optimization"
    );

    let mut uidx = 0;
    let mut last_cost = f32::NAN;
    let mut best_valid_cost = f32::INFINITY;
    let mut bad_counter = 0;
    let mut epochs = 0;
    for eidx in 0..config.max_epochs {
        epochs = eidx + 1;
        if let Some(p) = progress.as_mut() {
            p.start_epoch();
        }
        let mut epoch_cost = 0.0;
        let kf = minibatch_indices(corpus.train.len(), config.batch_size, true);
        for idx in kf.iter() {
            uidx += 1;
            let batch = EncDecBatch::from_pairs(&corpus.train, idx);
            let cost = match model.train_step(&batch) {
                Ok(cost) => cost,
                Err(err) => {
                    warn!(%err, epoch = eidx, update = uidx, "aborting training");
                    return Err(err);
                }
            };
            last_cost = cost;
            epoch_cost += cost;
            log.scalar("train/cost", uidx, cost);
            if let Some(p) = progress.as_mut() {
                p.update_batch(cost);
            }
            if uidx % config.disp_freq == 0 {
                info!(epoch = eidx, update = uidx, cost, "training");
            }
        }
        let mean_cost = epoch_cost / kf.len().max(1) as f32;

        if corpus.valid.is_empty() {
            if let Some(p) = progress.as_mut() {
                p.finish_epoch(f32::NAN, mean_cost);
            }
            continue;
        }
        let valid_cost = model.pred_cost(&corpus.valid, config.valid_batch_size);
        log.scalar("valid/cost", uidx, valid_cost);
        match progress.as_mut() {
            Some(p) => p.finish_epoch(valid_cost, mean_cost),
            None => info!(epoch = eidx, valid_cost, mean_cost, "epoch finished"),
        }

        if valid_cost < best_valid_cost {
            best_valid_cost = valid_cost;
            bad_counter = 0;
            if let Some(dir) = &config.model_dir {
                model.save(dir)?;
            }
        } else {
            bad_counter += 1;
            if bad_counter > config.patience {
                info!(epoch = eidx, "early stop");
                break;
            }
        }
    }

    Ok((
        model,
        EncDecReport {
            epochs,
            updates: uidx,
            last_cost,
            best_valid_cost,
        },
    ))
}

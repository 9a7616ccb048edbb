//! The three training programs as library code.

/// Bidirectional LSTM encoder with an LSTM decoder.
pub mod enc_dec;
/// Softmax regression on MNIST with early stopping.
pub mod logistic;
/// Feed-forward n-gram language model.
pub mod nplm;

use crate::config::OptimizerKind;
use crate::ml::optim::{Adadelta, ClippedSGD, RMSProp};
use crate::ml::Optimizer;

/// `Sgd` rescales gradients whose global norm exceeds `clip_norm`.
pub(crate) fn build_optimizer(
    kind: OptimizerKind,
    lrate: f32,
    clip_norm: f32,
) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Adadelta => Box::new(Adadelta::new()),
        OptimizerKind::Rmsprop => Box::new(RMSProp::new()),
        OptimizerKind::Sgd => Box::new(ClippedSGD::with_rescale(lrate, clip_norm)),
    }
}

/// Scalar log of a run. Writes TensorBoard events with the `logging`
/// feature and does nothing otherwise.
pub(crate) struct RunLog {
    #[cfg(feature = "logging")]
    inner: Option<crate::ml::logger::TensorBoardLogger>,
}

impl RunLog {
    #[cfg(feature = "logging")]
    pub(crate) fn new(program: &str) -> Self {
        let inner = match crate::ml::logger::TensorBoardLogger::new(program) {
            Ok(logger) => Some(logger),
            Err(err) => {
                tracing::warn!(%err, "tensorboard logging disabled");
                None
            }
        };
        RunLog { inner }
    }

    #[cfg(not(feature = "logging"))]
    pub(crate) fn new(_program: &str) -> Self {
        RunLog {}
    }

    #[cfg(feature = "logging")]
    pub(crate) fn scalar(&mut self, tag: &str, step: usize, value: f32) {
        if let Some(logger) = self.inner.as_mut() {
            logger.set_step(step);
            logger.log_scalar(tag, value);
        }
    }

    #[cfg(not(feature = "logging"))]
    pub(crate) fn scalar(&mut self, _tag: &str, _step: usize, _value: f32) {}
}

/// Patience-based early stopping.
///
/// Training continues while `iter < patience`. A validation loss that
/// beats the best so far by the improvement threshold extends the
/// patience to `iter * patience_increase`.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    patience_increase: usize,
    improvement_threshold: f32,
    validation_frequency: usize,
    best_loss: f32,
    best_iter: Option<usize>,
}

impl EarlyStopping {
    pub fn new(
        patience: usize,
        patience_increase: usize,
        improvement_threshold: f32,
        n_train_batches: usize,
    ) -> Self {
        EarlyStopping {
            patience,
            patience_increase,
            improvement_threshold,
            validation_frequency: n_train_batches.min(patience / 2).max(1),
            best_loss: f32::INFINITY,
            best_iter: None,
        }
    }

    pub fn validation_frequency(&self) -> usize {
        self.validation_frequency
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    /// `iter` counts minibatch updates from zero.
    pub fn should_validate(&self, iter: usize) -> bool {
        (iter + 1) % self.validation_frequency == 0
    }

    /// Records a validation loss; returns `true` for a new best.
    pub fn observe(&mut self, iter: usize, loss: f32) -> bool {
        if loss >= self.best_loss {
            return false;
        }
        if loss < self.best_loss * self.improvement_threshold {
            self.patience = self.patience.max(iter * self.patience_increase);
        }
        self.best_loss = loss;
        self.best_iter = Some(iter);
        true
    }

    pub fn should_stop(&self, iter: usize) -> bool {
        self.patience <= iter
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    pub fn best_iter(&self) -> Option<usize> {
        self.best_iter
    }
}

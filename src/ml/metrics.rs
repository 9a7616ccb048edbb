use super::Tensor;

/// Classification metrics for evaluating model performance
pub struct ClassificationMetrics;

impl ClassificationMetrics {
    /// Fraction of rows whose predicted class matches the target.
    ///
    /// # Arguments
    /// * `predictions` - Model output, shape [batch, n_classes] or [batch]
    /// * `targets` - Ground truth, class ids of shape [batch], or one-hot
    ///   rows of shape [batch, n_classes]
    pub fn accuracy(predictions: &Tensor, targets: &Tensor) -> f32 {
        let pred = Self::labels(predictions);
        let truth = if targets.shape.len() == predictions.shape.len() && targets.shape.len() > 1 {
            Self::labels(targets)
        } else {
            targets.to_ids()
        };
        assert_eq!(
            pred.len(),
            truth.len(),
            "Predictions and targets must have same batch size"
        );
        if pred.is_empty() {
            return 0.0;
        }

        let correct = pred.iter().zip(truth.iter()).filter(|(a, b)| a == b).count();
        correct as f32 / pred.len() as f32
    }

    /// Number of misclassified rows.
    pub fn errors(predictions: &Tensor, targets: &Tensor) -> usize {
        let pred = Self::labels(predictions);
        let truth = targets.to_ids();
        assert_eq!(pred.len(), truth.len());
        pred.iter().zip(truth.iter()).filter(|(a, b)| a != b).count()
    }

    /// Mean zero-one loss, `1 - accuracy`.
    pub fn zero_one_loss(predictions: &Tensor, targets: &Tensor) -> f32 {
        1.0 - Self::accuracy(predictions, targets)
    }

    fn labels(t: &Tensor) -> Vec<usize> {
        if t.shape.len() <= 1 {
            t.to_ids()
        } else {
            t.argmax(Some(t.shape.len() - 1)).to_ids()
        }
    }
}

/// Convenience function for accuracy calculation
pub fn accuracy(predictions: &Tensor, targets: &Tensor) -> f32 {
    ClassificationMetrics::accuracy(predictions, targets)
}

pub fn errors(predictions: &Tensor, targets: &Tensor) -> usize {
    ClassificationMetrics::errors(predictions, targets)
}

pub fn zero_one_loss(predictions: &Tensor, targets: &Tensor) -> f32 {
    ClassificationMetrics::zero_one_loss(predictions, targets)
}

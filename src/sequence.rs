//! Batching helpers for variable-length sequences.

use crate::ml::Tensor;
use crate::utills::rand::{rng, RngCore};

/// Splits `0..n` into consecutive batches of `batch_size`; the last batch
/// holds the remainder. With `shuffle` the indices are permuted first.
pub fn minibatch_indices(n: usize, batch_size: usize, shuffle: bool) -> Vec<Vec<usize>> {
    assert!(batch_size > 0, "batch size must be positive");
    let mut idx: Vec<usize> = (0..n).collect();
    if shuffle {
        rng().shuffle(&mut idx);
    }
    idx.chunks(batch_size).map(|c| c.to_vec()).collect()
}

/// A time-major padded batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    /// Token ids `[maxlen, N]`, zero (`<PAD>`) past each sequence's end.
    pub x: Tensor,
    /// `[maxlen, N]`, one on real tokens.
    pub mask: Tensor,
    pub lengths: Vec<usize>,
}

/// Pads `seqs` into a `[maxlen, N]` id matrix with its mask.
pub fn pad_and_mask(seqs: &[Vec<usize>]) -> PaddedBatch {
    let n = seqs.len();
    let lengths: Vec<usize> = seqs.iter().map(|s| s.len()).collect();
    let maxlen = lengths.iter().copied().max().unwrap_or(0);

    let mut x = vec![0.0; maxlen * n];
    let mut mask = vec![0.0; maxlen * n];
    for (col, seq) in seqs.iter().enumerate() {
        for (t, &id) in seq.iter().enumerate() {
            x[t * n + col] = id as f32;
            mask[t * n + col] = 1.0;
        }
    }

    PaddedBatch {
        x: Tensor::new(x, vec![maxlen, n]),
        mask: Tensor::new(mask, vec![maxlen, n]),
        lengths,
    }
}

use crate::ml::Tensor;
use crate::utills::rand::{rng, RngCore};

/// Types that can be batched by stacking along a new leading axis.
pub trait Stackable: Sized {
    type Output;
    fn stack(batch: Vec<Self>) -> Self::Output;
}

impl Stackable for Tensor {
    type Output = Tensor;
    fn stack(batch: Vec<Self>) -> Self::Output {
        assert!(!batch.is_empty(), "batch length is 0");

        for bs in batch.windows(2) {
            assert_eq!(
                bs[0].shape, bs[1].shape,
                "data shape is different, bs[0].shape={:?}, bs[1].shape={:?}",
                bs[0].shape, bs[1].shape
            );
        }

        let mut data = Vec::with_capacity(batch.len() * batch[0].len());
        for b in batch.iter() {
            data.extend_from_slice(b.as_f32_slice());
        }

        let mut shape = vec![batch.len()];
        shape.extend_from_slice(&batch[0].shape);

        Tensor::new(data, shape)
    }
}

pub trait Dataset {
    type Item: Stackable;

    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Self::Item;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Dataloader<D>
where
    D: Dataset,
{
    dataset: D,
    batch_size: usize,
    strict_batch_size: bool,
    shuffle: bool,
}

impl<D: Dataset> Dataloader<D> {
    /// Shuffling loader. With `strict_batch_size` a trailing short batch
    /// is dropped.
    pub fn new(dataset: D, batch_size: usize, strict_batch_size: bool) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            dataset,
            batch_size,
            strict_batch_size,
            shuffle: true,
        }
    }

    /// Visit samples in dataset order instead of shuffling each pass.
    pub fn in_order(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn iter_batch(&self) -> BatchIterator<'_, D> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            rng().shuffle(&mut indices);
        }
        // batches are popped from the back
        indices.reverse();

        BatchIterator {
            dataloader: self,
            strict_batch_size: self.strict_batch_size,
            batch_size: self.batch_size,
            indices,
        }
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.len() == 0
    }

    /// Number of batches one pass yields.
    pub fn n_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.strict_batch_size {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }
}

pub struct BatchIterator<'a, D: Dataset> {
    dataloader: &'a Dataloader<D>,
    strict_batch_size: bool,
    batch_size: usize,
    indices: Vec<usize>,
}

impl<D: Dataset> Iterator for BatchIterator<'_, D> {
    type Item = <D::Item as Stackable>::Output;

    fn next(&mut self) -> Option<Self::Item> {
        if self.indices.is_empty()
            || (self.strict_batch_size && self.indices.len() < self.batch_size)
        {
            return None;
        }
        let take = self.batch_size.min(self.indices.len());
        let mut v = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(index) = self.indices.pop() {
                v.push(self.dataloader.dataset.get(index));
            }
        }

        Some(D::Item::stack(v))
    }
}

pub use stackable_derive::Stackable;

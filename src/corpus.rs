//! Data loaders for the training programs.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::dataset::{Dataset, Stackable};
use crate::dict::{read_lines, Dict, PAD};
use crate::error::{CutilsError, Result};
use crate::ml::Tensor;

pub const MNIST_PIXELS: usize = 784;

/// Images scaled to `[0, 1]` with their digit labels.
#[derive(Debug, Clone, Default)]
pub struct MnistSplit {
    pub images: Vec<f32>,
    pub labels: Vec<usize>,
}

#[derive(Stackable)]
pub struct MnistSample {
    pub x: Tensor,
    pub y: Tensor,
}

impl MnistSplit {
    /// Reads `label,pixel,...,pixel` rows; pixels are divided by 255.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut split = MnistSplit::default();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let location = format!("{}:{}", path.display(), lineno + 1);
            let (label, pixels) = parse_mnist_line(&line, &location)?;
            split.labels.push(label);
            split.images.extend(pixels);
        }
        info!(path = %path.display(), samples = split.len(), "loaded mnist split");
        Ok(split)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Images `[B, 784]` and labels `[B]` for `indices`.
    pub fn batch(&self, indices: &[usize]) -> (Tensor, Tensor) {
        let samples = indices.iter().map(|&i| self.get(i)).collect();
        let MnistSample { x, y } = MnistSample::stack(samples);
        (x, y)
    }
}

impl Dataset for MnistSplit {
    type Item = MnistSample;

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> MnistSample {
        let pixels = self.images[index * MNIST_PIXELS..(index + 1) * MNIST_PIXELS].to_vec();
        MnistSample {
            x: Tensor::new(pixels, vec![MNIST_PIXELS]),
            y: Tensor::from_ids(&[self.labels[index]], vec![]),
        }
    }
}

fn parse_mnist_line(line: &str, location: &str) -> Result<(usize, Vec<f32>)> {
    let mut parts = line.split(',');
    let label = parts
        .next()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&l| l < 10)
        .ok_or_else(|| CutilsError::format(location, "label must be a digit 0-9"))?;
    let pixels = parts
        .map(|p| {
            p.trim()
                .parse::<f32>()
                .map(|v| v / 255.0)
                .map_err(|e| CutilsError::format(location, format!("bad pixel {:?}: {}", p, e)))
        })
        .collect::<Result<Vec<f32>>>()?;
    if pixels.len() != MNIST_PIXELS {
        return Err(CutilsError::format(
            location,
            format!("expected {} pixels, found {}", MNIST_PIXELS, pixels.len()),
        ));
    }
    Ok((label, pixels))
}

/// Splits off the last `valid_fraction` of `items`.
fn split_tail<T>(mut items: Vec<T>, valid_fraction: f32) -> (Vec<T>, Vec<T>) {
    let n_valid = ((items.len() as f32) * valid_fraction.clamp(0.0, 1.0)) as usize;
    let valid = items.split_off(items.len() - n_valid);
    (items, valid)
}

/// `(context, next word)` pairs of one sentence. The sentence is left
/// padded with `context_size` `<PAD>` ids so every word is predicted.
pub fn ngrams(sentence: &[usize], context_size: usize) -> Vec<(Vec<usize>, usize)> {
    let mut padded = vec![PAD; context_size];
    padded.extend_from_slice(sentence);
    (context_size..padded.len())
        .map(|i| (padded[i - context_size..i].to_vec(), padded[i]))
        .collect()
}

/// Fixed-width contexts and their next-word targets.
#[derive(Debug, Clone, Default)]
pub struct Ngrams {
    pub context_size: usize,
    /// `[len, context_size]`, row-major.
    pub contexts: Vec<usize>,
    pub targets: Vec<usize>,
}

#[derive(Stackable)]
pub struct NgramSample {
    pub context: Tensor,
    pub target: Tensor,
}

impl Ngrams {
    fn from_pairs(pairs: Vec<(Vec<usize>, usize)>, context_size: usize) -> Self {
        let mut out = Ngrams {
            context_size,
            ..Default::default()
        };
        for (ctx, y) in pairs {
            out.contexts.extend(ctx);
            out.targets.push(y);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Contexts `[B, context_size]` and targets `[B]` for `indices`.
    pub fn batch(&self, indices: &[usize]) -> (Tensor, Tensor) {
        let samples = indices.iter().map(|&i| self.get(i)).collect();
        let NgramSample { context, target } = NgramSample::stack(samples);
        (context, target)
    }
}

impl Dataset for Ngrams {
    type Item = NgramSample;

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn get(&self, index: usize) -> NgramSample {
        let c = self.context_size;
        NgramSample {
            context: Tensor::from_ids(&self.contexts[index * c..(index + 1) * c], vec![c]),
            target: Tensor::from_ids(&[self.targets[index]], vec![]),
        }
    }
}

/// A monolingual corpus cut into n-gram training pairs.
pub struct NgramCorpus {
    pub dictionary: Dict,
    pub train: Ngrams,
    pub valid: Ngrams,
}

impl NgramCorpus {
    pub fn from_sentences<S: AsRef<str>>(
        sentences: &[S],
        n_words: usize,
        emb_dim: usize,
        context_size: usize,
        valid_fraction: f32,
    ) -> Self {
        let dictionary = Dict::new(sentences, n_words, emb_dim);
        let pairs: Vec<_> = sentences
            .iter()
            .flat_map(|s| ngrams(&dictionary.read_sentence(s.as_ref()), context_size))
            .collect();
        let (train, valid) = split_tail(pairs, valid_fraction);
        info!(train = train.len(), valid = valid.len(), "n-gram partitions created");

        NgramCorpus {
            dictionary,
            train: Ngrams::from_pairs(train, context_size),
            valid: Ngrams::from_pairs(valid, context_size),
        }
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        n_words: usize,
        emb_dim: usize,
        context_size: usize,
        valid_fraction: f32,
    ) -> Result<Self> {
        let sentences = read_lines(path)?;
        Ok(Self::from_sentences(
            &sentences,
            n_words,
            emb_dim,
            context_size,
            valid_fraction,
        ))
    }
}

/// Source sentence ids paired with target sentence ids.
pub type SentencePair = (Vec<usize>, Vec<usize>);

/// Line-aligned source and target text.
pub struct ParallelCorpus {
    pub source_dict: Dict,
    pub target_dict: Dict,
    pub train: Vec<SentencePair>,
    pub valid: Vec<SentencePair>,
}

impl ParallelCorpus {
    pub fn from_sentences<S: AsRef<str>>(
        source: &[S],
        target: &[S],
        n_words_src: usize,
        n_words_tgt: usize,
        dim_proj: usize,
        valid_fraction: f32,
    ) -> Result<Self> {
        if source.len() != target.len() {
            return Err(CutilsError::format(
                "parallel corpus",
                format!(
                    "{} source sentences but {} target sentences",
                    source.len(),
                    target.len()
                ),
            ));
        }
        let source_dict = Dict::new(source, n_words_src, dim_proj);
        let target_dict = Dict::new(target, n_words_tgt, dim_proj);
        let pairs: Vec<SentencePair> = source
            .iter()
            .zip(target.iter())
            .map(|(s, t)| {
                (
                    source_dict.read_sentence(s.as_ref()),
                    target_dict.read_sentence(t.as_ref()),
                )
            })
            .filter(|(s, t)| !s.is_empty() && !t.is_empty())
            .collect();
        let (train, valid) = split_tail(pairs, valid_fraction);
        info!(train = train.len(), valid = valid.len(), "parallel partitions created");

        Ok(ParallelCorpus {
            source_dict,
            target_dict,
            train,
            valid,
        })
    }

    pub fn from_files(
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        n_words_src: usize,
        n_words_tgt: usize,
        dim_proj: usize,
        valid_fraction: f32,
    ) -> Result<Self> {
        // blank lines are kept so the two files stay aligned
        let source: Vec<String> = fs::read_to_string(source)?.lines().map(String::from).collect();
        let target: Vec<String> = fs::read_to_string(target)?.lines().map(String::from).collect();
        Self::from_sentences(
            &source,
            &target,
            n_words_src,
            n_words_tgt,
            dim_proj,
            valid_fraction,
        )
    }
}

//! Vocabulary and word embeddings.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::ml::embedding::Embedding;
use crate::ml::{Node, Tensor};
use crate::utills::rand::get_random_uniform;

pub const PAD: usize = 0;
pub const UNK: usize = 1;
pub const PAD_TOKEN: &str = "<PAD>";
pub const UNK_TOKEN: &str = "<UNK>";

const VOCAB_FILE: &str = "vocab.json";
const WEMB_FILE: &str = "Wemb.param";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vocabulary {
    /// Word for every id.
    words: Vec<String>,
    /// Unnormalised noise weights, one per id.
    counts: Vec<u64>,
    emb_dim: usize,
}

/// Word <-> id mapping with a randomly initialised embedding table.
///
/// Id 0 is `<PAD>` and id 1 is `<UNK>`. The `n_words` most frequent
/// words follow in descending frequency (ties alphabetical).
pub struct Dict {
    vocab: Vocabulary,
    index: HashMap<String, usize>,
    wemb: Tensor,
}

impl Dict {
    pub fn new<S: AsRef<str>>(sentences: &[S], n_words: usize, emb_dim: usize) -> Self {
        let mut wordcount: HashMap<&str, u64> = HashMap::new();
        for s in sentences {
            for word in s.as_ref().split_whitespace() {
                *wordcount.entry(word).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(&str, u64)> = wordcount.iter().map(|(w, c)| (*w, *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut words = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];
        let mut counts = vec![0, 0];
        for (rank, (word, count)) in ranked.iter().enumerate() {
            if rank < n_words && *word != UNK_TOKEN {
                words.push(word.to_string());
                counts.push(*count);
            } else {
                counts[UNK] += count;
            }
        }

        let total: u64 = wordcount.values().sum();
        info!(
            total_words = total,
            unique_words = wordcount.len(),
            retained = words.len(),
            "dictionary built"
        );

        let vocab = Vocabulary {
            words,
            counts,
            emb_dim,
        };
        let wemb = Self::initialize_embedding(vocab.words.len(), emb_dim);
        Self::from_parts(vocab, wemb)
    }

    /// Builds the vocabulary from a text file, one sentence per line.
    pub fn from_file(path: impl AsRef<Path>, n_words: usize, emb_dim: usize) -> Result<Self> {
        let sentences = read_lines(path)?;
        Ok(Self::new(&sentences, n_words, emb_dim))
    }

    fn from_parts(vocab: Vocabulary, wemb: Tensor) -> Self {
        let index = vocab
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();
        Dict { vocab, index, wemb }
    }

    /// `0.01 * U[0, 1)` of shape `[n_words, emb_dim]`.
    fn initialize_embedding(n_words: usize, emb_dim: usize) -> Tensor {
        let data = get_random_uniform(n_words * emb_dim, 0.0, 0.01);
        Tensor::new(data, vec![n_words, emb_dim])
    }

    pub fn num_words(&self) -> usize {
        self.vocab.words.len()
    }

    pub fn emb_dim(&self) -> usize {
        self.vocab.emb_dim
    }

    pub fn id(&self, word: &str) -> usize {
        self.index.get(word).copied().unwrap_or(UNK)
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.vocab.words.get(id).map(String::as_str)
    }

    /// Whitespace tokens as ids; unknown words map to `<UNK>`.
    pub fn read_sentence(&self, line: &str) -> Vec<usize> {
        line.split_whitespace().map(|w| self.id(w)).collect()
    }

    /// Renders each column of an id matrix `[T, N]` as a sentence.
    pub fn idx_to_words(&self, idx: &Tensor) -> Vec<String> {
        assert_eq!(idx.shape.len(), 2, "expected a [T, N] id matrix");
        let (steps, n) = (idx.shape[0], idx.shape[1]);
        let ids = idx.to_ids();
        (0..n)
            .map(|col| {
                (0..steps)
                    .map(|t| self.word(ids[t * n + col]).unwrap_or(UNK_TOKEN))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /// Unigram distribution over ids for noise-contrastive estimation.
    ///
    /// `<PAD>` gets no mass and `<UNK>` gets the mass of every word that
    /// did not make it into the vocabulary.
    pub fn noise_distribution(&self) -> Vec<f32> {
        let total: u64 = self.vocab.counts.iter().sum();
        if total == 0 {
            return vec![0.0; self.num_words()];
        }
        self.vocab
            .counts
            .iter()
            .map(|&c| c as f32 / total as f32)
            .collect()
    }

    pub fn wemb(&self) -> &Tensor {
        &self.wemb
    }

    pub fn set_wemb(&mut self, wemb: Tensor) {
        assert_eq!(wemb.shape, self.wemb.shape, "Wemb shape mismatch");
        self.wemb = wemb;
    }

    /// A graph node initialised from `Wemb`.
    pub fn embedding(&self) -> Embedding {
        Embedding::new(self.wemb.clone())
    }

    /// Writes `vocab.json` and `Wemb.param` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let writer = BufWriter::new(File::create(dir.join(VOCAB_FILE))?);
        serde_json::to_writer(writer, &self.vocab)?;
        Embedding::new(self.wemb.clone()).save_param(&dir.join(WEMB_FILE))
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let reader = BufReader::new(File::open(dir.join(VOCAB_FILE))?);
        let vocab: Vocabulary = serde_json::from_reader(reader)?;
        let mut emb = Embedding::new(Tensor::zeros(vec![vocab.words.len(), vocab.emb_dim]));
        emb.load_param(&dir.join(WEMB_FILE))?;
        Ok(Self::from_parts(vocab, emb.table))
    }
}

/// Non-empty lines of a text file.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

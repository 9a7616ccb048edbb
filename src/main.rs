use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cutils::config::{
    load_config, EncDecConfig, LogisticConfig, LogisticMethod, NplmConfig, OptimizerKind,
};
use cutils::corpus::{NgramCorpus, ParallelCorpus};
use cutils::models::{enc_dec, logistic, nplm};
use cutils::utills::rand;

#[derive(Parser)]
#[command(name = "cutils", version, about = "Train the cutils example models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seed for the global random generator
    #[arg(long)]
    seed: Option<u64>,
    /// Directory for saved parameters
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Softmax regression on MNIST (CSV: label,784 pixels)
    Logreg {
        #[command(flatten)]
        common: Common,
        #[arg(long)]
        train: Option<PathBuf>,
        #[arg(long)]
        valid: Option<PathBuf>,
        #[arg(long)]
        test: Option<PathBuf>,
        #[arg(long)]
        learning_rate: Option<f32>,
        #[arg(long)]
        n_epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long, value_enum)]
        method: Option<LogisticMethod>,
    },
    /// N-gram neural probabilistic language model
    Nplm {
        #[command(flatten)]
        common: Common,
        /// Text corpus, one sentence per line
        dataset: Option<PathBuf>,
        #[arg(long)]
        learning_rate: Option<f32>,
        #[arg(long)]
        n_epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        context_size: Option<usize>,
        #[arg(long)]
        progress: bool,
    },
    /// LSTM encoder-decoder on line-aligned source and target files
    EncDec {
        #[command(flatten)]
        common: Common,
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        target: Option<PathBuf>,
        #[arg(long)]
        dim_proj: Option<usize>,
        #[arg(long)]
        max_epochs: Option<usize>,
        #[arg(long, value_enum)]
        optimizer: Option<OptimizerKind>,
        #[arg(long)]
        no_dropout: bool,
        #[arg(long)]
        progress: bool,
    },
}

fn seed(seed: Option<u64>) {
    if let Some(seed) = seed {
        rand::seed(seed);
        info!(seed, "seeded random generator");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Logreg {
            common,
            train,
            valid,
            test,
            learning_rate,
            n_epochs,
            batch_size,
            method,
        } => {
            let mut config: LogisticConfig =
                load_config(common.config.as_deref()).context("reading logreg config")?;
            if let Some(v) = train {
                config.train_path = v;
            }
            if let Some(v) = valid {
                config.valid_path = v;
            }
            if let Some(v) = test {
                config.test_path = v;
            }
            config.learning_rate = learning_rate.unwrap_or(config.learning_rate);
            config.n_epochs = n_epochs.unwrap_or(config.n_epochs);
            config.batch_size = batch_size.unwrap_or(config.batch_size);
            config.method = method.unwrap_or(config.method);
            config.model_dir = common.model_dir.or(config.model_dir);
            config.seed = common.seed.or(config.seed);
            seed(config.seed);

            let data = logistic::MnistData::load(&config).context("loading MNIST")?;
            let (_, report) = logistic::train(&config, &data)?;
            println!(
                "best validation error {:.4} %, test error {:.4} %",
                report.best_validation_error * 100.0,
                report.test_error * 100.0
            );
        }
        Command::Nplm {
            common,
            dataset,
            learning_rate,
            n_epochs,
            batch_size,
            context_size,
            progress,
        } => {
            let mut config: NplmConfig =
                load_config(common.config.as_deref()).context("reading nplm config")?;
            if let Some(v) = dataset {
                config.dataset = v;
            }
            config.learning_rate = learning_rate.unwrap_or(config.learning_rate);
            config.n_epochs = n_epochs.unwrap_or(config.n_epochs);
            config.batch_size = batch_size.unwrap_or(config.batch_size);
            config.context_size = context_size.unwrap_or(config.context_size);
            config.progress |= progress;
            config.model_dir = common.model_dir.or(config.model_dir);
            config.seed = common.seed.or(config.seed);
            seed(config.seed);

            info!("creating the partitions");
            let corpus = NgramCorpus::from_file(
                &config.dataset,
                config.n_words,
                config.n_in,
                config.context_size,
                config.valid_fraction,
            )
            .with_context(|| format!("reading {}", config.dataset.display()))?;
            let (_, report) = nplm::train(&config, &corpus)?;
            println!(
                "{} updates, last cost {:.4}, valid cost {:.4}",
                report.updates, report.last_cost, report.valid_cost
            );
        }
        Command::EncDec {
            common,
            source,
            target,
            dim_proj,
            max_epochs,
            optimizer,
            no_dropout,
            progress,
        } => {
            let mut config: EncDecConfig =
                load_config(common.config.as_deref()).context("reading enc-dec config")?;
            if let Some(v) = source {
                config.source_path = v;
            }
            if let Some(v) = target {
                config.target_path = v;
            }
            config.dim_proj = dim_proj.unwrap_or(config.dim_proj);
            config.max_epochs = max_epochs.unwrap_or(config.max_epochs);
            config.optimizer = optimizer.unwrap_or(config.optimizer);
            config.use_dropout &= !no_dropout;
            config.progress |= progress;
            config.model_dir = common.model_dir.or(config.model_dir);
            config.seed = common.seed.or(config.seed);
            seed(config.seed);

            let corpus = ParallelCorpus::from_files(
                &config.source_path,
                &config.target_path,
                config.n_words_src,
                config.n_words_tgt,
                config.dim_proj,
                config.valid_fraction,
            )
            .context("reading parallel corpus")?;
            let (_, report) = enc_dec::train(&config, &corpus)?;
            println!(
                "{} epochs, {} updates, best valid cost {:.4}",
                report.epochs, report.updates, report.best_valid_cost
            );
        }
    }
    Ok(())
}

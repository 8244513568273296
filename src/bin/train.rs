use std::path::PathBuf;

use burn::{
    optim::AdamConfig,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wavenet_asr_burn::{train, Result, TrainingConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Train a WaveNet acoustic model with the CTC loss", long_about = None)]
pub struct Args {
    /// Training configuration (JSON). Written with the command line values if missing.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for checkpoints and the copied configuration.
    #[arg(long, default_value = "model")]
    model_dir: String,

    /// Index (`.scp`) of the training samples.
    #[arg(long, default_value = "data/train.scp")]
    train_input: String,

    /// Index (`.scp`) of the validation samples.
    #[arg(long)]
    test_input: Option<String>,

    /// Symbol table, one symbol per line.
    #[arg(long, default_value = "data/symbols.txt")]
    sym_file: String,

    /// Number of MFCC features per frame.
    #[arg(long, default_value_t = 20)]
    feature_size: usize,

    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Steps between checkpoints and reports.
    #[arg(long, default_value_t = 100)]
    report_step: usize,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

impl Args {
    fn training_config(&self) -> Result<TrainingConfig> {
        if let Some(path) = &self.config {
            if path.exists() {
                return Ok(TrainingConfig::load(path)?);
            }
        }

        let config = TrainingConfig::new(
            self.model_dir.clone(),
            self.train_input.clone(),
            self.sym_file.clone(),
            self.feature_size,
            AdamConfig::new(),
        )
        .with_test_input(self.test_input.clone())
        .with_batch_size(self.batch_size)
        .with_epochs(self.epochs)
        .with_learning_rate(self.learning_rate)
        .with_report_step(self.report_step)
        .with_seed(self.seed);

        if let Some(path) = &self.config {
            config.save(path)?;
        }
        Ok(config)
    }
}

pub fn run<B: AutodiffBackend>(args: Args, device: B::Device) -> Result<()> {
    let config = args.training_config()?;
    train::<B>(&config, device)?;
    Ok(())
}

#[cfg(feature = "ndarray")]
mod ndarray {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};

    pub fn run(args: Args) -> Result<()> {
        super::run::<Autodiff<NdArray>>(args, NdArrayDevice::Cpu)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use super::*;
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };

    pub fn run(args: Args) -> Result<()> {
        super::run::<Autodiff<Wgpu>>(args, WgpuDevice::default())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    #[cfg(feature = "wgpu")]
    let result = wgpu::run(args);
    #[cfg(all(feature = "ndarray", not(feature = "wgpu")))]
    let result = ndarray::run(args);
    #[cfg(not(any(feature = "ndarray", feature = "wgpu")))]
    let result: Result<()> = {
        drop(args);
        Err(wavenet_asr_burn::AsrError::Config(
            "enable the `ndarray` or `wgpu` feature to select a backend".to_string(),
        ))
    };

    if let Err(err) = result {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{transform::ShuffledDataset, Dataset},
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::{
    ctc::{ctc_loss, greedy_decode, label_error_rate},
    dataset::{AsrBatch, AsrBatcher, AsrDataset, AudioSample, Symbols},
    error::AsrError,
    model::{WaveNet, WaveNetConfig},
};

/// Loss and predictions for one batch.
#[derive(Debug, Clone)]
pub struct CtcOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    /// `[time, batch, num_classes]`
    pub logits: Tensor<B, 3>,
    pub frame_lengths: Vec<usize>,
    pub labels: Vec<Vec<u32>>,
}

impl<B: Backend> CtcOutput<B> {
    pub fn loss_value(&self) -> f64 {
        self.loss.clone().into_scalar().elem::<f64>()
    }

    /// Label error rate of the greedy transcription against the references.
    pub fn label_error_rate(&self) -> crate::Result<f64> {
        let hypotheses = greedy_decode(self.logits.clone(), &self.frame_lengths)?;
        label_error_rate(&hypotheses, &self.labels)
    }
}

impl<B: Backend> WaveNet<B> {
    pub fn forward_ctc(
        &self,
        batch: AsrBatch<B>,
        is_training: bool,
    ) -> crate::Result<CtcOutput<B>> {
        let logits = self.forward(batch.features, batch.seq_len, is_training)?;
        let loss = ctc_loss(logits.clone(), &batch.labels, &batch.frame_lengths)?;

        Ok(CtcOutput {
            loss,
            logits,
            frame_lengths: batch.frame_lengths,
            labels: batch.labels,
        })
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    /// Directory receiving checkpoints, the config copy and the symbol table copy.
    pub model_dir: String,
    /// Index (`.scp`) of the training samples.
    pub train_input: String,
    pub sym_file: String,
    /// Features per frame.
    pub feature_size: usize,

    pub optimizer: AdamConfig,

    /// Index (`.scp`) of the validation samples.
    #[config(default = "None")]
    pub test_input: Option<String>,

    #[config(default = 16)]
    pub batch_size: usize,

    #[config(default = 1)]
    pub valid_batch_size: usize,

    #[config(default = 10)]
    pub epochs: usize,

    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Steps between checkpoint, report and validation.
    #[config(default = 100)]
    pub report_step: usize,

    #[config(default = 1)]
    pub seed: u64,

    #[config(default = 128)]
    pub num_dim: usize,

    #[config(default = 3)]
    pub num_blocks: usize,

    #[config(default = 7)]
    pub kernel_size: usize,

    #[config(default = "vec![1, 2, 4, 8, 16]")]
    pub dilations: Vec<usize>,
}

impl TrainingConfig {
    pub fn model_config(&self, num_classes: usize) -> WaveNetConfig {
        WaveNetConfig::new(self.feature_size, num_classes)
            .with_num_dim(self.num_dim)
            .with_num_blocks(self.num_blocks)
            .with_kernel_size(self.kernel_size)
            .with_dilations(self.dilations.clone())
    }

    fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 || self.valid_batch_size == 0 {
            return Err(AsrError::Config("batch sizes must be non-zero".to_string()));
        }
        if self.report_step == 0 {
            return Err(AsrError::Config("report_step must be non-zero".to_string()));
        }
        if self.feature_size == 0 {
            return Err(AsrError::Config("feature_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Saves and restores numbered model checkpoints in a directory.
///
/// The step of the most recent checkpoint is kept in a `checkpoint` file next to the
/// `model-{step}` records.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
    recorder: CompactRecorder,
}

impl Checkpointer {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            recorder: CompactRecorder::new(),
        }
    }

    fn model_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("model-{step}"))
    }

    pub fn save<B: Backend>(&self, model: &WaveNet<B>, step: usize) -> crate::Result<()> {
        fs::create_dir_all(&self.dir)?;
        model.clone().save_file(self.model_path(step), &self.recorder)?;
        fs::write(self.dir.join("checkpoint"), step.to_string())?;
        Ok(())
    }

    /// Step of the most recent checkpoint, if any.
    pub fn latest(&self) -> crate::Result<Option<usize>> {
        let path = self.dir.join("checkpoint");
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let step = content.trim().parse::<usize>().map_err(|err| {
            AsrError::Checkpoint(format!("invalid step in {}: {err}", path.display()))
        })?;
        Ok(Some(step))
    }

    pub fn load<B: Backend>(
        &self,
        model: WaveNet<B>,
        step: usize,
        device: &B::Device,
    ) -> crate::Result<WaveNet<B>> {
        Ok(model.load_file(self.model_path(step), &self.recorder, device)?)
    }
}

#[derive(Debug, Default)]
struct StepMetrics {
    train_time_sec: f64,
    loss: f64,
    ler: f64,
    steps: usize,
}

impl StepMetrics {
    fn add(&mut self, elapsed: f64, loss: f64, ler: f64) {
        self.train_time_sec += elapsed;
        self.loss += loss;
        self.ler += ler;
        self.steps += 1;
    }

    fn averages(&self) -> (f64, f64) {
        let steps = self.steps.max(1) as f64;
        (self.loss / steps, self.ler / steps)
    }

    fn reset(&mut self) {
        self.loss = 0.0;
        self.ler = 0.0;
        self.steps = 0;
    }
}

/// Cycles over a dataset, one batch at a time.
struct ValidationFeed {
    dataset: AsrDataset,
    cursor: usize,
    batch_size: usize,
}

impl ValidationFeed {
    fn next_items(&mut self) -> Vec<AudioSample> {
        let len = self.dataset.len();
        let items = (0..self.batch_size.min(len))
            .filter_map(|offset| self.dataset.get((self.cursor + offset) % len))
            .collect();
        self.cursor = (self.cursor + self.batch_size) % len.max(1);
        items
    }
}

fn check_vocabulary(symbols: &Symbols, dataset: &AsrDataset) -> crate::Result<()> {
    let blank = symbols.blank().ok_or_else(|| {
        AsrError::Symbol("symbol table has no blank, it must end with `<blank>`".to_string())
    })?;
    if blank as usize != symbols.len() - 1 {
        return Err(AsrError::Symbol("the blank must be the last symbol".to_string()));
    }
    if let Some(label) = dataset.max_label().filter(|&label| label >= blank) {
        return Err(AsrError::Dataset(format!(
            "label {label} is outside the vocabulary of {} symbols",
            symbols.len()
        )));
    }
    Ok(())
}

/// Train a [WaveNet](WaveNet) acoustic model with the CTC loss.
///
/// Resumes from the latest checkpoint in `model_dir` if there is one. Every
/// `report_step` steps the model is saved, the running averages are logged and, when a
/// validation set is configured, one validation batch is evaluated in inference mode.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> crate::Result<WaveNet<B>> {
    config.validate()?;
    B::seed(config.seed);

    let model_dir = PathBuf::from(&config.model_dir);
    fs::create_dir_all(&model_dir)?;

    let symbols = Symbols::read(&config.sym_file)?;
    let train_set = AsrDataset::from_scp(&config.train_input, config.feature_size)?;
    if train_set.is_empty() {
        return Err(AsrError::Dataset(format!("{} lists no samples", config.train_input)));
    }
    check_vocabulary(&symbols, &train_set)?;
    let train_set = Arc::new(train_set);

    let mut validation = match &config.test_input {
        Some(path) => {
            let dataset = AsrDataset::from_scp(path, config.feature_size)?;
            check_vocabulary(&symbols, &dataset)?;
            (!dataset.is_empty()).then_some(ValidationFeed {
                dataset,
                cursor: 0,
                batch_size: config.valid_batch_size,
            })
        }
        None => None,
    };

    tracing::info!(
        "Batch Dimensions: [{}, *, {}]",
        config.batch_size,
        config.feature_size
    );
    tracing::info!("Label Dimensions: [{}, *]", config.batch_size);

    let mut model = config.model_config(symbols.len()).init::<B>(&device)?;
    let checkpointer = Checkpointer::new(&model_dir);
    let mut global_step = 0;
    if let Some(step) = checkpointer.latest()? {
        model = checkpointer.load(model, step, &device)?;
        global_step = step;
        tracing::info!(step, "restored checkpoint");
    }

    config.save(model_dir.join("config.json"))?;
    let sym_name = Path::new(&config.sym_file)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("symbols.txt"));
    symbols.write(model_dir.join(sym_name))?;

    let mut optim = config.optimizer.init();
    let batcher = AsrBatcher::new(config.feature_size);
    let mut metrics = StepMetrics::default();
    let indices: Vec<usize> = (0..train_set.len()).collect();

    for epoch in 0..config.epochs {
        let shuffled: ShuffledDataset<_, AudioSample> =
            ShuffledDataset::with_seed(train_set.clone(), config.seed + epoch as u64);

        for chunk in indices.chunks(config.batch_size) {
            let items: Vec<AudioSample> = chunk.iter().filter_map(|&i| shuffled.get(i)).collect();
            let batch: AsrBatch<B> = batcher.batch(items, &device);
            global_step += 1;

            let start = Instant::now();
            let output = model.forward_ctc(batch, true)?;
            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
            metrics.add(
                start.elapsed().as_secs_f64(),
                output.loss_value(),
                output.label_error_rate()?,
            );

            if global_step % config.report_step == 0 {
                checkpointer.save(&model, global_step)?;

                let (loss, ler) = metrics.averages();
                tracing::info!("Step: {global_step:04}, cost = {loss:.4}, ler = {ler:.4}");
                metrics.reset();

                if let Some(feed) = validation.as_mut() {
                    let batch: AsrBatch<B::InnerBackend> = batcher.batch(feed.next_items(), &device);
                    let output = model.valid().forward_ctc(batch, false)?;
                    tracing::info!(
                        "Valid: cost = {:.4}, ler = {:.4}",
                        output.loss_value(),
                        output.label_error_rate()?
                    );
                }
            }
        }
        tracing::debug!(epoch, step = global_step, "finished epoch");
    }

    tracing::info!("Done Training...");
    if metrics.steps > 0 {
        checkpointer.save(&model, global_step)?;
    }
    tracing::info!(
        train_time_sec = metrics.train_time_sec,
        "Finished training!!!"
    );

    Ok(model)
}

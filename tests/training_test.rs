//! End-to-end training on a tiny synthetic corpus.

use std::{fs, path::Path};

use burn::{
    backend::{Autodiff, NdArray},
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
};
use wavenet_asr_burn::{
    dataset::{AsrDataset, AudioSample, Symbols},
    train,
    training::Checkpointer,
    transcribe, TrainingConfig,
};

type B = Autodiff<NdArray<f32>>;

const FEATURES: usize = 4;

fn write_corpus(dir: &Path) -> Symbols {
    let texts = ["ab", "ba", "a b", "bb"];
    let symbols = Symbols::from_transcriptions(texts).unwrap();

    let samples = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let frames = (0..6 + i)
                .map(|t| (0..FEATURES).map(|f| ((t * FEATURES + f) as f32 * 0.37).sin()).collect())
                .collect();
            AudioSample::new(format!("utt{i}"), frames, *text, &symbols).unwrap()
        })
        .collect();

    let dataset = AsrDataset::new(samples, FEATURES).unwrap();
    dataset.write_scp(dir.join("train.scp")).unwrap();
    symbols.write(dir.join("symbols.txt")).unwrap();
    symbols
}

fn config(data: &Path, model_dir: &Path) -> TrainingConfig {
    TrainingConfig::new(
        model_dir.to_string_lossy().into_owned(),
        data.join("train.scp").to_string_lossy().into_owned(),
        data.join("symbols.txt").to_string_lossy().into_owned(),
        FEATURES,
        AdamConfig::new(),
    )
    .with_test_input(Some(data.join("train.scp").to_string_lossy().into_owned()))
    .with_batch_size(2)
    .with_epochs(2)
    .with_report_step(2)
    .with_num_dim(8)
    .with_num_blocks(1)
    .with_kernel_size(3)
    .with_dilations(vec![1, 2])
}

#[test]
fn trains_checkpoints_and_resumes() {
    let data = tempfile::tempdir().unwrap();
    let model_dir = data.path().join("model");
    let symbols = write_corpus(data.path());
    let config = config(data.path(), &model_dir);

    let model = train::<B>(&config, Default::default()).unwrap();
    assert_eq!(model.num_classes(), symbols.len());

    let checkpointer = Checkpointer::new(&model_dir);
    // 4 samples in batches of 2 for 2 epochs
    assert_eq!(checkpointer.latest().unwrap(), Some(4));
    assert!(model_dir.join("config.json").exists());
    assert_eq!(Symbols::read(model_dir.join("symbols.txt")).unwrap(), symbols);

    let saved = TrainingConfig::load(model_dir.join("config.json")).unwrap();
    assert_eq!(saved.report_step, 2);
    assert_eq!(saved.dilations, vec![1, 2]);

    train::<B>(&config, Default::default()).unwrap();
    assert_eq!(checkpointer.latest().unwrap(), Some(8));
}

#[test]
fn trained_model_transcribes() {
    let data = tempfile::tempdir().unwrap();
    let model_dir = data.path().join("model");
    let symbols = write_corpus(data.path());
    let config = config(data.path(), &model_dir).with_epochs(1);

    let model = train::<B>(&config, Default::default()).unwrap();
    let features = vec![vec![0.25; FEATURES]; 7];
    let text = transcribe(&model.valid(), features, &symbols, &Default::default()).unwrap();

    assert!(text.chars().all(|c| "ab ".contains(c)), "{text}");
}

#[test]
fn rejects_labels_outside_the_vocabulary() {
    let data = tempfile::tempdir().unwrap();
    let model_dir = data.path().join("model");
    write_corpus(data.path());
    // a symbol table without `b` or the space
    fs::write(data.path().join("symbols.txt"), "a\n<blank>\n").unwrap();

    let result = train::<B>(&config(data.path(), &model_dir), Default::default());
    assert!(result.is_err());
}

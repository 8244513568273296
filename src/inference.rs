use burn::{
    data::dataloader::batcher::Batcher,
    tensor::backend::Backend,
};

use crate::{
    ctc::greedy_decode,
    dataset::{AsrBatch, AsrBatcher, AudioSample, Symbols},
    error::{AsrError, Result},
    model::{WaveNet, WaveNetError},
};

/// Transcribe one utterance with greedy CTC decoding.
///
/// `features` holds one `input_channels` wide row per frame. The model runs in
/// inference mode so batch norm uses its running moments.
pub fn transcribe<B: Backend>(
    model: &WaveNet<B>,
    features: Vec<Vec<f32>>,
    symbols: &Symbols,
    device: &B::Device,
) -> Result<String> {
    if features.is_empty() {
        return Ok(String::new());
    }
    if symbols.len() != model.num_classes() {
        return Err(AsrError::Symbol(format!(
            "{} symbols for a model with {} classes",
            symbols.len(),
            model.num_classes()
        )));
    }

    let width = model.input_channels();
    if let Some((t, frame)) = features
        .iter()
        .enumerate()
        .find(|(_, frame)| frame.len() != width)
    {
        return Err(WaveNetError::ShapeMismatch {
            expected: format!("{width} features per frame"),
            actual: format!("{} features in frame {t}", frame.len()),
        }
        .into());
    }

    let sample = AudioSample {
        name: String::new(),
        features,
        labels: Vec::new(),
        transcription: String::new(),
    };
    let batch: AsrBatch<B> = AsrBatcher::new(width).batch(vec![sample], device);
    let frames = batch.frame_lengths.clone();

    let logits = model.forward(batch.features, batch.seq_len, false)?;
    let ids = greedy_decode(logits, &frames)?;

    Ok(ids.first().map(|ids| symbols.decode(ids)).unwrap_or_default())
}

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};
use derive_new::new;

use super::AudioSample;

/// A padded batch of utterances.
#[derive(Clone, Debug)]
pub struct AsrBatch<B: Backend> {
    /// Zero-padded features `[batch, time, feature_size]`.
    pub features: Tensor<B, 3>,
    /// Valid frames per utterance `[batch]`.
    pub seq_len: Tensor<B, 1, Int>,
    /// Host copy of `seq_len`.
    pub frame_lengths: Vec<usize>,
    /// Unpadded label ids per utterance.
    pub labels: Vec<Vec<u32>>,
}

/// Pads utterances of different lengths into an [`AsrBatch`].
///
/// Items are expected to be validated against `feature_size` (as [`AsrDataset`] does);
/// a frame of another width is truncated or zero-padded to it.
///
/// [`AsrDataset`]: super::AsrDataset
#[derive(Clone, Debug, new)]
pub struct AsrBatcher {
    feature_size: usize,
}

impl<B: Backend> Batcher<B, AudioSample, AsrBatch<B>> for AsrBatcher {
    fn batch(&self, items: Vec<AudioSample>, device: &B::Device) -> AsrBatch<B> {
        let batch_size = items.len();
        let max_frames = items.iter().map(AudioSample::num_frames).max().unwrap_or(0);

        let mut features = vec![0.0f32; batch_size * max_frames * self.feature_size];
        for (b, item) in items.iter().enumerate() {
            for (t, frame) in item.features.iter().enumerate() {
                let offset = (b * max_frames + t) * self.feature_size;
                features[offset..offset + self.feature_size]
                    .iter_mut()
                    .zip(frame)
                    .for_each(|(dst, &src)| *dst = src);
            }
        }

        let frame_lengths: Vec<usize> = items.iter().map(AudioSample::num_frames).collect();
        let seq_len: Vec<i64> = frame_lengths.iter().map(|&len| len as i64).collect();

        let features = Tensor::<B, 3>::from_data(
            TensorData::new(features, [batch_size, max_frames, self.feature_size])
                .convert::<B::FloatElem>(),
            device,
        );
        let seq_len = Tensor::<B, 1, Int>::from_data(
            TensorData::new(seq_len, [batch_size]).convert::<B::IntElem>(),
            device,
        );

        AsrBatch {
            features,
            seq_len,
            frame_lengths,
            labels: items.into_iter().map(|item| item.labels).collect(),
        }
    }
}

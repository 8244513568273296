use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use super::Symbols;
use crate::error::{AsrError, Result};

/// One utterance: MFCC frames and the label ids of its transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSample {
    pub name: String,
    /// `[frames][feature_size]`
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<u32>,
    pub transcription: String,
}

impl AudioSample {
    /// Build a sample, encoding the transcription with `symbols`.
    pub fn new(
        name: impl Into<String>,
        features: Vec<Vec<f32>>,
        transcription: impl Into<String>,
        symbols: &Symbols,
    ) -> Result<Self> {
        let transcription = transcription.into();
        let labels = symbols.encode(&transcription)?;
        Ok(Self {
            name: name.into(),
            features,
            labels,
            transcription,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.features.len()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    fn validate(&self, feature_size: usize) -> Result<()> {
        if let Some(frame) = self.features.iter().find(|frame| frame.len() != feature_size) {
            return Err(AsrError::Dataset(format!(
                "sample `{}` has {} features per frame, expected {feature_size}",
                self.name,
                frame.len()
            )));
        }
        if self.labels.len() > self.num_frames() {
            return Err(AsrError::Dataset(format!(
                "sample `{}` has {} labels for only {} frames",
                self.name,
                self.labels.len(),
                self.num_frames()
            )));
        }
        if self.features.is_empty() {
            return Err(AsrError::Dataset(format!("sample `{}` has no frames", self.name)));
        }
        Ok(())
    }
}

/// In-memory collection of utterances listed by an index (`.scp`) file.
#[derive(Debug, Clone)]
pub struct AsrDataset {
    samples: Vec<AudioSample>,
    feature_size: usize,
}

impl AsrDataset {
    /// Validate and wrap samples that are already in memory.
    pub fn new(samples: Vec<AudioSample>, feature_size: usize) -> Result<Self> {
        for sample in &samples {
            sample.validate(feature_size)?;
        }
        Ok(Self {
            samples,
            feature_size,
        })
    }

    /// Load every sample listed in `scp`, one file name per line, relative to the
    /// directory holding the index.
    pub fn from_scp<P: AsRef<Path>>(scp: P, feature_size: usize) -> Result<Self> {
        let scp = scp.as_ref();
        let root = scp.parent().map(Path::to_path_buf).unwrap_or_default();
        let index = fs::read_to_string(scp)?;

        let samples = index
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let path: PathBuf = root.join(line);
                AudioSample::load(&path).map_err(|err| {
                    AsrError::Dataset(format!("failed to load {}: {err}", path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            samples = samples.len(),
            index = %scp.display(),
            "loaded dataset"
        );
        Self::new(samples, feature_size)
    }

    /// Write every sample next to `scp` and list them in it.
    pub fn write_scp<P: AsRef<Path>>(&self, scp: P) -> Result<()> {
        let scp = scp.as_ref();
        let root = scp.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut index = String::new();
        for sample in &self.samples {
            let file_name = format!("{}.json", sample.name);
            sample.save(root.join(&file_name))?;
            index.push_str(&file_name);
            index.push('\n');
        }
        fs::write(scp, index)?;
        Ok(())
    }

    pub fn feature_size(&self) -> usize {
        self.feature_size
    }

    /// Largest label id used by any sample.
    pub fn max_label(&self) -> Option<u32> {
        self.samples
            .iter()
            .flat_map(|sample| sample.labels.iter().copied())
            .max()
    }
}

impl Dataset<AudioSample> for AsrDataset {
    fn get(&self, index: usize) -> Option<AudioSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

//! WaveNet-style acoustic model for speech recognition with Burn.
//!
//! A stack of gated dilated 1-D convolutions maps MFCC frames to per-frame class
//! logits which are trained with the CTC loss.
//!
//! # Example
//!
//! ```ignore
//! use wavenet_asr_burn::{WaveNet, WaveNetConfig};
//! use burn::backend::NdArray;
//!
//! type B = NdArray<f32>;
//!
//! let device = Default::default();
//! let model: WaveNet<B> = WaveNetConfig::new(20, 29).init(&device)?;
//! // [time, batch, classes]
//! let logits = model.forward(features, seq_len, false)?;
//! ```

pub mod ctc;
pub mod dataset;
mod error;
mod inference;
pub mod model;
pub mod training;

pub use error::*;
pub use inference::*;
pub use model::*;
pub use training::{train, TrainingConfig};

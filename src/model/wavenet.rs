use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Int, Tensor},
};

use super::{
    Activation, Conv1d, Conv1dConfig, ParamRegistry, ResidualBlock, ResidualBlockConfig,
    WaveNetError,
};

/// WaveNet-style acoustic model.
///
/// Derived from [speech-to-text-wavenet](https://github.com/buriburisuri/speech-to-text-wavenet):
/// a 1x1 front convolution widens the features to the latent size, a stack of gated
/// residual blocks cycles through the dilation schedule, and the summed skip outputs are
/// projected to per-frame class logits.
#[derive(Module, Debug)]
pub struct WaveNet<B: Backend> {
    front: Conv1d<B>,
    blocks: Vec<ResidualBlock<B>>,
    logit_hidden: Conv1d<B>,
    logit_out: Conv1d<B>,
    input_channels: usize,
    num_classes: usize,
}

impl<B: Backend> WaveNet<B> {
    /// Compute time-major logits for a batch of features.
    ///
    /// # Arguments
    /// - `features`: padded features `[batch, time, input_channels]`
    /// - `seq_len`: number of valid frames per utterance `[batch]`; the network itself does
    ///   not mask padding, the lengths are consumed by the sequence loss
    /// - `is_training`: batch statistics (and running moment updates) when `true`,
    ///   running moments when `false`
    ///
    /// # Returns
    /// Unnormalized logits `[time, batch, num_classes]`.
    pub fn forward(
        &self,
        features: Tensor<B, 3>,
        seq_len: Tensor<B, 1, Int>,
        is_training: bool,
    ) -> Result<Tensor<B, 3>, WaveNetError> {
        let [batch, _, _] = features.dims();
        let [lengths] = seq_len.dims();
        if lengths != batch {
            return Err(WaveNetError::ShapeMismatch {
                expected: format!("{batch} sequence lengths"),
                actual: format!("{lengths} sequence lengths"),
            });
        }

        let skip = self.skip_sum(features, is_training)?;

        let out = self.logit_hidden.forward(skip, is_training)?;
        let logits = self.logit_out.forward(out, is_training)?;

        // [batch, time, classes] -> [time, batch, classes]
        Ok(logits.swap_dims(0, 1))
    }

    /// Front projection followed by every residual block, returning the summed skip outputs.
    fn skip_sum(&self, features: Tensor<B, 3>, is_training: bool) -> Result<Tensor<B, 3>, WaveNetError> {
        let dims = features.dims();
        if dims[2] != self.input_channels {
            return Err(WaveNetError::ShapeMismatch {
                expected: format!("[batch, time, {}]", self.input_channels),
                actual: format!("{dims:?}"),
            });
        }

        let mut z = self.front.forward(features, is_training)?;
        let mut skip = Tensor::zeros(z.dims(), &z.device());

        for block in &self.blocks {
            let (residual, out) = block.forward(z, is_training)?;
            z = residual;
            skip = skip + out;
        }

        Ok(skip)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// [WaveNet](WaveNet) configuration.
#[derive(Config, Debug)]
pub struct WaveNetConfig {
    /// Feature size per frame.
    pub input_channels: usize,
    /// Number of output classes, including the CTC blank.
    pub num_classes: usize,

    /// Latent width of every residual block.
    #[config(default = 128)]
    pub num_dim: usize,

    /// Number of times the dilation schedule is repeated.
    #[config(default = 3)]
    pub num_blocks: usize,

    #[config(default = 7)]
    pub kernel_size: usize,

    #[config(default = "vec![1, 2, 4, 8, 16]")]
    pub dilations: Vec<usize>,
}

impl WaveNetConfig {
    /// Initialize a new [WaveNet](WaveNet) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<WaveNet<B>, WaveNetError> {
        self.init_registered(&mut ParamRegistry::new(), device)
    }

    /// Initialize a new [WaveNet](WaveNet) module, recording every parameter path in `registry`.
    pub fn init_registered<B: Backend>(
        &self,
        registry: &mut ParamRegistry,
        device: &B::Device,
    ) -> Result<WaveNet<B>, WaveNetError> {
        self.validate()?;

        let front = Conv1dConfig::new(self.input_channels, self.num_dim, 1)
            .with_activation(Activation::Tanh)
            .with_norm(true)
            .init(&mut registry.scope("front").nested("conv_in"), device)?;

        let mut blocks = Vec::with_capacity(self.num_blocks * self.dilations.len());
        for block in 0..self.num_blocks {
            for &rate in &self.dilations {
                let config = ResidualBlockConfig::new(self.num_dim, self.kernel_size, rate, block);
                blocks.push(config.init(registry, device)?);
            }
        }

        let mut logit = registry.scope("logit");
        let logit_hidden = Conv1dConfig::new(self.num_dim, self.num_dim, 1)
            .with_activation(Activation::Tanh)
            .with_norm(true)
            .init(&mut logit.nested("conv_1"), device)?;
        let logit_out = Conv1dConfig::new(self.num_dim, self.num_classes, 1)
            .init(&mut logit.nested("conv_2"), device)?;

        tracing::debug!(
            parameters = registry.len(),
            residual_blocks = blocks.len(),
            receptive_field = self.receptive_field(),
            "initialized WaveNet"
        );

        Ok(WaveNet {
            front,
            blocks,
            logit_hidden,
            logit_out,
            input_channels: self.input_channels,
            num_classes: self.num_classes,
        })
    }

    /// Number of input frames that can influence one output frame.
    pub fn receptive_field(&self) -> usize {
        let per_cycle: usize = self
            .dilations
            .iter()
            .map(|rate| (self.kernel_size.saturating_sub(1)) * rate)
            .sum();
        1 + self.num_blocks * per_cycle
    }

    fn validate(&self) -> Result<(), WaveNetError> {
        let invalid = |msg: &str| Err(WaveNetError::InvalidConfig(msg.to_string()));

        if self.input_channels == 0 {
            return invalid("input_channels must be non-zero");
        }
        if self.num_classes == 0 {
            return invalid("num_classes must be non-zero");
        }
        if self.num_dim == 0 {
            return invalid("num_dim must be non-zero");
        }
        if self.num_blocks == 0 {
            return invalid("num_blocks must be non-zero");
        }
        if self.kernel_size == 0 {
            return invalid("kernel_size must be non-zero");
        }
        if self.dilations.is_empty() {
            return invalid("dilation schedule must not be empty");
        }
        if self.dilations.contains(&0) {
            return invalid("dilation rates must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    fn features(batch: usize, time: usize, channels: usize) -> Tensor<B, 3> {
        Tensor::random([batch, time, channels], Distribution::Normal(0.0, 1.0), &Default::default())
    }

    fn lengths(values: &[i64]) -> Tensor<B, 1, Int> {
        Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), &Default::default())
    }

    fn to_vec<const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn end_to_end_produces_time_major_logits() {
        let device = Default::default();
        let model = WaveNetConfig::new(20, 29).init::<B>(&device).unwrap();
        assert_eq!(model.num_residual_blocks(), 15);

        let logits = model
            .forward(features(2, 50, 20), lengths(&[50, 42]), true)
            .unwrap();

        assert_eq!(logits.dims(), [50, 2, 29]);
        assert!(to_vec(logits).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn inference_is_deterministic() {
        let device = Default::default();
        let model = WaveNetConfig::new(8, 5)
            .with_num_dim(16)
            .init::<B>(&device)
            .unwrap();

        // move the running moments away from their defaults first
        model.forward(features(3, 30, 8), lengths(&[30, 30, 30]), true).unwrap();

        let input = features(2, 25, 8);
        let a = model.forward(input.clone(), lengths(&[25, 25]), false).unwrap();
        let b = model.forward(input, lengths(&[25, 25]), false).unwrap();

        assert_eq!(to_vec(a), to_vec(b));
    }

    #[test]
    fn single_block_skip_equals_block_output() {
        let device = Default::default();
        let model = WaveNetConfig::new(4, 3)
            .with_num_dim(8)
            .with_num_blocks(1)
            .with_dilations(vec![2])
            .init::<B>(&device)
            .unwrap();
        let input = features(2, 12, 4);

        let z = model.front.forward(input.clone(), false).unwrap();
        let (_, expected) = model.blocks[0].forward(z, false).unwrap();
        let skip = model.skip_sum(input, false).unwrap();

        assert_eq!(to_vec(skip), to_vec(expected));
    }

    #[test]
    fn registers_every_parameter_once() {
        let device = Default::default();
        let mut registry = ParamRegistry::new();
        WaveNetConfig::new(20, 29)
            .with_num_dim(8)
            .init_registered::<B>(&mut registry, &device)
            .unwrap();

        // front: 5, blocks: 15 x 15, logit: 5 + 1
        assert_eq!(registry.len(), 236);
        assert!(registry.contains("front/conv_in/W"));
        assert!(registry.contains("block_2_16/conv_out/variance"));
        assert!(registry.contains("logit/conv_2/W"));
        assert!(!registry.contains("logit/conv_2/beta"));
    }

    #[test]
    fn training_pass_moves_running_moments() {
        let device = Default::default();
        let model = WaveNetConfig::new(4, 3)
            .with_num_dim(8)
            .with_num_blocks(1)
            .init::<B>(&device)
            .unwrap();
        let norm = model.front.norm.as_ref().unwrap();
        let before = to_vec(norm.running_mean.value_sync());

        let input = features(2, 10, 4);
        model.forward(input.clone(), lengths(&[10, 10]), false).unwrap();
        assert_eq!(to_vec(norm.running_mean.value_sync()), before);

        model.forward(input, lengths(&[10, 10]), true).unwrap();
        assert_ne!(to_vec(norm.running_mean.value_sync()), before);
    }

    #[test]
    fn rejects_feature_size_mismatch() {
        let device = Default::default();
        let model = WaveNetConfig::new(20, 29)
            .with_num_dim(8)
            .with_num_blocks(1)
            .init::<B>(&device)
            .unwrap();

        let result = model.forward(features(2, 10, 13), lengths(&[10, 10]), true);
        assert!(matches!(result, Err(WaveNetError::ShapeMismatch { .. })));

        let result = model.forward(features(2, 10, 20), lengths(&[10]), true);
        assert!(matches!(result, Err(WaveNetError::ShapeMismatch { .. })));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let device = Default::default();

        let empty = WaveNetConfig::new(20, 29).with_dilations(vec![]).init::<B>(&device);
        assert!(matches!(empty, Err(WaveNetError::InvalidConfig(_))));

        let zero_rate = WaveNetConfig::new(20, 29).with_dilations(vec![1, 0]).init::<B>(&device);
        assert!(matches!(zero_rate, Err(WaveNetError::InvalidConfig(_))));

        let no_classes = WaveNetConfig::new(20, 0).init::<B>(&device);
        assert!(matches!(no_classes, Err(WaveNetError::InvalidConfig(_))));
    }

    #[test]
    fn receptive_field_grows_with_dilations() {
        let config = WaveNetConfig::new(20, 29);
        // 3 cycles of 6 * (1 + 2 + 4 + 8 + 16)
        assert_eq!(config.receptive_field(), 1 + 3 * 6 * 31);
    }
}

use burn::{
    config::Config,
    module::{Module, Param, RunningState},
    tensor::{backend::Backend, Tensor},
};

use super::{Scope, WaveNetError};

/// Per-channel batch normalization over the last axis of its input.
///
/// In training mode the batch statistics normalize the input and are folded into the
/// running moments with an exponential moving average. In inference mode the running
/// moments normalize the input and are left untouched.
#[derive(Module, Debug)]
pub struct BatchNorm<B: Backend> {
    pub beta: Param<Tensor<B, 1>>,
    pub gamma: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    channels: usize,
    decay: f64,
    epsilon: f64,
}

/// [Batch normalization](BatchNorm) configuration.
#[derive(Config, Debug)]
pub struct BatchNormConfig {
    /// Number of channels, the size of the last input axis.
    pub channels: usize,

    /// Weight of the previous running moments in the moving average.
    #[config(default = 0.99)]
    pub decay: f64,

    /// Added to the variance before taking its square root.
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl BatchNormConfig {
    /// Initialize a new [batch normalization](BatchNorm) module, registering
    /// `beta`, `gamma`, `mean` and `variance` under `scope`.
    pub fn init<B: Backend>(
        &self,
        scope: &mut Scope<'_>,
        device: &B::Device,
    ) -> Result<BatchNorm<B>, WaveNetError> {
        if !(0.0..1.0).contains(&self.decay) {
            return Err(WaveNetError::InvalidConfig(format!(
                "batch norm decay must be in [0, 1), got {}",
                self.decay
            )));
        }
        if self.epsilon <= 0.0 {
            return Err(WaveNetError::InvalidConfig(format!(
                "batch norm epsilon must be positive, got {}",
                self.epsilon
            )));
        }

        let shape = [self.channels];
        Ok(BatchNorm {
            beta: scope.constant("beta", shape, 0.0, device)?,
            gamma: scope.constant("gamma", shape, 1.0, device)?,
            running_mean: scope.running("mean", shape, 0.0, device)?,
            running_var: scope.running("variance", shape, 1.0, device)?,
            channels: self.channels,
            decay: self.decay,
            epsilon: self.epsilon,
        })
    }
}

impl<B: Backend> BatchNorm<B> {
    /// Normalize `input` of rank 2 to 5 along its last axis.
    ///
    /// Ranks 2 to 4 take the fused path: the variance folded into the running moments is
    /// the unbiased sample variance. Rank 5 takes the generic moments path, which folds
    /// the biased variance. Both paths normalize with the biased batch variance.
    ///
    /// # Shapes
    /// - input: `[..., channels]`
    /// - output: same as input
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
        is_training: bool,
    ) -> Result<Tensor<B, D>, WaveNetError> {
        if !(2..=5).contains(&D) {
            return Err(WaveNetError::UnsupportedRank(D));
        }

        let dims = input.dims();
        let channels = dims[D - 1];
        if channels != self.channels {
            return Err(WaveNetError::ShapeMismatch {
                expected: format!("{} channels", self.channels),
                actual: format!("{channels} channels in shape {dims:?}"),
            });
        }

        // Every axis but the channel axis is a reduction axis
        let rows = input.shape().num_elements() / channels;
        let flat = input.reshape([rows, channels]);

        let output = if is_training {
            self.forward_train(flat, D <= 4)
        } else {
            self.forward_inference(flat)
        };

        Ok(output.reshape(dims))
    }

    fn forward_train(&self, flat: Tensor<B, 2>, fused: bool) -> Tensor<B, 2> {
        let [rows, _] = flat.dims();

        let mean = flat.clone().mean_dim(0);
        let centered = flat - mean.clone();
        let variance = centered.clone().powf_scalar(2.0).mean_dim(0);

        let output = self.scale_and_shift(centered, variance.clone());

        let variance = if fused && rows > 1 {
            variance.mul_scalar(rows as f64 / (rows - 1) as f64)
        } else {
            variance
        };
        self.update_running(mean, variance);

        output
    }

    fn forward_inference(&self, flat: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = flat.device();
        let mean = self
            .running_mean
            .value_sync()
            .to_device(&device)
            .reshape([1, self.channels]);
        let variance = self
            .running_var
            .value_sync()
            .to_device(&device)
            .reshape([1, self.channels]);

        self.scale_and_shift(flat - mean, variance)
    }

    fn scale_and_shift(&self, centered: Tensor<B, 2>, variance: Tensor<B, 2>) -> Tensor<B, 2> {
        let gamma = self.gamma.val().reshape([1, self.channels]);
        let beta = self.beta.val().reshape([1, self.channels]);
        let std = variance.add_scalar(self.epsilon).sqrt();

        centered.div(std).mul(gamma).add(beta)
    }

    fn update_running(&self, mean: Tensor<B, 2>, variance: Tensor<B, 2>) {
        let device = mean.device();
        let mean = mean.detach().reshape([self.channels]);
        let variance = variance.detach().reshape([self.channels]);

        let running_mean = self.running_mean.value_sync().to_device(&device);
        let running_var = self.running_var.value_sync().to_device(&device);

        self.running_mean.update(
            running_mean
                .mul_scalar(self.decay)
                .add(mean.mul_scalar(1.0 - self.decay)),
        );
        self.running_var.update(
            running_var
                .mul_scalar(self.decay)
                .add(variance.mul_scalar(1.0 - self.decay)),
        );
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

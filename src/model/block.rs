use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use super::{
    Activation, Conv1d, Conv1dConfig, DilatedConv1d, DilatedConv1dConfig, ParamRegistry,
    WaveNetError,
};

/// WaveNet residual block with a gated activation unit.
///
/// A tanh filter convolution and a sigmoid gate convolution see the same input; their
/// product goes through a 1x1 projection which is both added back to the input
/// (residual path) and emitted on the side (skip path).
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv_filter: DilatedConv1d<B>,
    conv_gate: DilatedConv1d<B>,
    conv_out: Conv1d<B>,
}

impl<B: Backend> ResidualBlock<B> {
    /// Returns `(residual, skip)`, both `[batch, time, channels]` like the input.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        is_training: bool,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 3>), WaveNetError> {
        let filter = self.conv_filter.forward(input.clone(), is_training)?;
        let gate = self.conv_gate.forward(input.clone(), is_training)?;

        let out = self.conv_out.forward(filter * gate, is_training)?;

        Ok((out.clone() + input, out))
    }

    pub fn rate(&self) -> usize {
        self.conv_filter.rate()
    }
}

/// [Residual block](ResidualBlock) configuration.
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// Latent width shared by the input, the residual and the skip output.
    pub channels: usize,
    pub kernel_size: usize,
    pub rate: usize,
    /// Index of the dilation cycle this block belongs to, used for parameter names.
    pub block: usize,
}

impl ResidualBlockConfig {
    /// Initialize a new [residual block](ResidualBlock) module under the
    /// `block_{block}_{rate}` scope.
    pub fn init<B: Backend>(
        &self,
        registry: &mut ParamRegistry,
        device: &B::Device,
    ) -> Result<ResidualBlock<B>, WaveNetError> {
        let mut scope = registry.scope(&format!("block_{}_{}", self.block, self.rate));

        let dilated = |activation| {
            DilatedConv1dConfig::new(self.channels, self.channels, self.kernel_size, self.rate)
                .with_activation(activation)
                .with_norm(true)
        };

        let conv_filter = dilated(Activation::Tanh).init(&mut scope.nested("conv_filter"), device)?;
        let conv_gate = dilated(Activation::Sigmoid).init(&mut scope.nested("conv_gate"), device)?;
        let conv_out = Conv1dConfig::new(self.channels, self.channels, 1)
            .with_activation(Activation::Tanh)
            .with_norm(true)
            .init(&mut scope.nested("conv_out"), device)?;

        Ok(ResidualBlock {
            conv_filter,
            conv_gate,
            conv_out,
        })
    }
}

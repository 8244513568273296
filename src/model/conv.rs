use core::str::FromStr;

use burn::{
    config::Config,
    module::{Ignored, Module, Param},
    tensor::{
        activation::{sigmoid, tanh},
        backend::Backend,
        module::{conv1d, conv2d},
        ops::ConvOptions,
        Tensor,
    },
};
use serde::{Deserialize, Serialize};

use super::{BatchNorm, BatchNormConfig, Scope, WaveNetError};

/// Pointwise nonlinearity applied at the end of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    None,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::None => input,
            Activation::Tanh => tanh(input),
            Activation::Sigmoid => sigmoid(input),
        }
    }
}

/// Padding mode along the sequence axis, with TensorFlow semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// Output length is `ceil(length / stride)`; an odd padding total puts the extra
    /// element on the right.
    Same,
    /// No padding.
    Valid,
}

impl Padding {
    /// Left and right padding for a sequence of `length` frames.
    pub fn pads(
        &self,
        length: usize,
        kernel_size: usize,
        stride: usize,
        dilation: usize,
    ) -> Result<(usize, usize), WaveNetError> {
        let effective = (kernel_size - 1) * dilation + 1;
        match self {
            Padding::Same => {
                let out_length = length.div_ceil(stride);
                let total = (out_length.saturating_sub(1) * stride + effective).saturating_sub(length);
                Ok((total / 2, total - total / 2))
            }
            Padding::Valid if length < effective => Err(WaveNetError::ShapeMismatch {
                expected: format!("at least {effective} frames for VALID padding"),
                actual: format!("{length} frames"),
            }),
            Padding::Valid => Ok((0, 0)),
        }
    }
}

impl FromStr for Padding {
    type Err = WaveNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("same") {
            Ok(Padding::Same)
        } else if s.eq_ignore_ascii_case("valid") {
            Ok(Padding::Valid)
        } else {
            Err(WaveNetError::UnsupportedPadding(s.to_string()))
        }
    }
}

/// Zero-pad `axis` with `left` elements before and `right` elements after.
fn pad_axis<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    axis: usize,
    left: usize,
    right: usize,
) -> Tensor<B, D> {
    if left == 0 && right == 0 {
        return input;
    }

    let device = input.device();
    let dims = input.dims();
    let zeros = |size: usize| {
        let mut dims = dims;
        dims[axis] = size;
        Tensor::<B, D>::zeros(dims, &device)
    };

    let mut parts = Vec::with_capacity(3);
    if left > 0 {
        parts.push(zeros(left));
    }
    parts.push(input);
    if right > 0 {
        parts.push(zeros(right));
    }

    Tensor::cat(parts, axis)
}

fn check_config(in_channels: usize, out_channels: usize, kernel_size: usize) -> Result<(), WaveNetError> {
    if in_channels == 0 || out_channels == 0 || kernel_size == 0 {
        return Err(WaveNetError::InvalidConfig(format!(
            "convolution needs non-zero channels and kernel size, got in={in_channels} out={out_channels} size={kernel_size}"
        )));
    }
    Ok(())
}

fn check_channels(expected: usize, dims: [usize; 3]) -> Result<(), WaveNetError> {
    if dims[2] != expected {
        return Err(WaveNetError::ShapeMismatch {
            expected: format!("[batch, time, {expected}]"),
            actual: format!("{dims:?}"),
        });
    }
    Ok(())
}

/// 1-D convolution over the time axis of a `[batch, time, channels]` tensor,
/// followed by optional bias, batch normalization and activation.
#[derive(Module, Debug)]
pub struct Conv1d<B: Backend> {
    /// Kernel in `(size, in_channels, out_channels)` layout.
    pub weight: Param<Tensor<B, 3>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    pub norm: Option<BatchNorm<B>>,
    activation: Ignored<Activation>,
    padding: Ignored<Padding>,
    stride: usize,
}

/// [1-D convolution](Conv1d) configuration.
#[derive(Config, Debug)]
pub struct Conv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,

    #[config(default = 1)]
    pub stride: usize,

    #[config(default = "Padding::Same")]
    pub padding: Padding,

    #[config(default = "Activation::None")]
    pub activation: Activation,

    #[config(default = false)]
    pub norm: bool,

    #[config(default = false)]
    pub bias: bool,
}

impl Conv1dConfig {
    /// Initialize a new [1-D convolution](Conv1d) module, registering its parameters under `scope`.
    pub fn init<B: Backend>(
        &self,
        scope: &mut Scope<'_>,
        device: &B::Device,
    ) -> Result<Conv1d<B>, WaveNetError> {
        check_config(self.in_channels, self.out_channels, self.kernel_size)?;
        if self.stride == 0 {
            return Err(WaveNetError::InvalidConfig(
                "convolution stride must be non-zero".to_string(),
            ));
        }

        let shape = [self.kernel_size, self.in_channels, self.out_channels];
        let weight = scope.he_uniform("W", shape, 1.0, device)?;
        let bias = match self.bias {
            true => Some(scope.constant("b", [self.out_channels], 0.0, device)?),
            false => None,
        };
        let norm = match self.norm {
            true => Some(BatchNormConfig::new(self.out_channels).init(scope, device)?),
            false => None,
        };

        Ok(Conv1d {
            weight,
            bias,
            norm,
            activation: Ignored(self.activation),
            padding: Ignored(self.padding),
            stride: self.stride,
        })
    }
}

impl<B: Backend> Conv1d<B> {
    /// # Shapes
    /// - input: `[batch, time, in_channels]`
    /// - output: `[batch, time / stride, out_channels]` (`SAME`)
    pub fn forward(&self, input: Tensor<B, 3>, is_training: bool) -> Result<Tensor<B, 3>, WaveNetError> {
        let [kernel_size, in_channels, out_channels] = self.weight.val().dims();
        check_channels(in_channels, input.dims())?;

        let [_, length, _] = input.dims();
        let (left, right) = self.padding.pads(length, kernel_size, self.stride, 1)?;

        // [batch, time, channels] -> [batch, channels, time]
        let x = pad_axis(input.swap_dims(1, 2), 2, left, right);
        let weight = self.weight.val().permute([2, 1, 0]);
        let out = conv1d(x, weight, None, ConvOptions::new([self.stride], [0], [1], 1));
        let out = out.swap_dims(1, 2);

        let out = match &self.bias {
            Some(bias) => out + bias.val().reshape([1, 1, out_channels]),
            None => out,
        };
        let out = match &self.norm {
            Some(norm) => norm.forward(out, is_training)?,
            None => out,
        };

        Ok(self.activation.forward(out))
    }
}

/// Dilated ("atrous") 1-D convolution over a `[batch, time, channels]` tensor.
///
/// The sequence is lifted to a `[batch, 1, time, channels]` image and convolved with a
/// `(1, size)` kernel whose taps are `rate` frames apart, then projected back to rank 3.
#[derive(Module, Debug)]
pub struct DilatedConv1d<B: Backend> {
    /// Kernel in `(1, size, in_channels, out_channels)` layout.
    pub weight: Param<Tensor<B, 4>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    pub norm: Option<BatchNorm<B>>,
    activation: Ignored<Activation>,
    padding: Ignored<Padding>,
    rate: usize,
}

/// [Dilated 1-D convolution](DilatedConv1d) configuration.
#[derive(Config, Debug)]
pub struct DilatedConv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub rate: usize,

    #[config(default = "Padding::Same")]
    pub padding: Padding,

    #[config(default = "Activation::None")]
    pub activation: Activation,

    #[config(default = false)]
    pub norm: bool,

    #[config(default = false)]
    pub bias: bool,
}

impl DilatedConv1dConfig {
    /// Initialize a new [dilated convolution](DilatedConv1d) module, registering its parameters under `scope`.
    pub fn init<B: Backend>(
        &self,
        scope: &mut Scope<'_>,
        device: &B::Device,
    ) -> Result<DilatedConv1d<B>, WaveNetError> {
        check_config(self.in_channels, self.out_channels, self.kernel_size)?;
        if self.rate == 0 {
            return Err(WaveNetError::InvalidConfig(
                "dilation rate must be non-zero".to_string(),
            ));
        }

        let shape = [1, self.kernel_size, self.in_channels, self.out_channels];
        let weight = scope.he_uniform("W", shape, 1.0, device)?;
        let bias = match self.bias {
            true => Some(scope.constant("b", [self.out_channels], 0.0, device)?),
            false => None,
        };
        let norm = match self.norm {
            true => Some(BatchNormConfig::new(self.out_channels).init(scope, device)?),
            false => None,
        };

        Ok(DilatedConv1d {
            weight,
            bias,
            norm,
            activation: Ignored(self.activation),
            padding: Ignored(self.padding),
            rate: self.rate,
        })
    }
}

impl<B: Backend> DilatedConv1d<B> {
    /// # Shapes
    /// - input: `[batch, time, in_channels]`
    /// - output: `[batch, time, out_channels]` (`SAME`)
    pub fn forward(&self, input: Tensor<B, 3>, is_training: bool) -> Result<Tensor<B, 3>, WaveNetError> {
        let [_, kernel_size, in_channels, out_channels] = self.weight.val().dims();
        check_channels(in_channels, input.dims())?;

        let [_, length, _] = input.dims();
        let (left, right) = self.padding.pads(length, kernel_size, 1, self.rate)?;

        // [batch, time, channels] -> [batch, 1, time, channels] -> [batch, channels, 1, time]
        let x = input.unsqueeze_dim::<4>(1).permute([0, 3, 1, 2]);
        let x = pad_axis(x, 3, left, right);
        let weight = self.weight.val().permute([3, 2, 0, 1]);
        let out = conv2d(
            x,
            weight,
            None,
            ConvOptions::new([1, 1], [0, 0], [1, self.rate], 1),
        );
        // back to [batch, 1, time, channels]
        let out = out.permute([0, 2, 3, 1]);

        let out = match &self.bias {
            Some(bias) => out + bias.val().reshape([1, 1, 1, out_channels]),
            None => out,
        };
        let out = match &self.norm {
            Some(norm) => norm.forward(out, is_training)?,
            None => out,
        };
        let out = self.activation.forward(out);

        Ok(out.squeeze::<3>(1))
    }

    pub fn rate(&self) -> usize {
        self.rate
    }
}

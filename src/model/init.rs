use std::collections::BTreeMap;

use burn::{
    module::{Param, RunningState},
    tensor::{backend::Backend, Distribution, Tensor},
};

use super::WaveNetError;

/// How a registered parameter is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Updated by the optimizer.
    Trainable,
    /// Updated only by the running statistics rule of batch normalization.
    Running,
}

/// Registry of every parameter path created while building a model.
///
/// Paths are `/` separated, e.g. `block_0_1/conv_filter/W`. Registering the same path
/// twice is an error, so two logically distinct tensors can never alias each other.
#[derive(Debug, Default, Clone)]
pub struct ParamRegistry {
    entries: BTreeMap<String, ParamKind>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a top-level naming scope.
    pub fn scope(&mut self, name: &str) -> Scope<'_> {
        Scope {
            registry: self,
            path: name.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn kind(&self, path: &str) -> Option<ParamKind> {
        self.entries.get(path).copied()
    }

    /// Registered paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn register(&mut self, path: String, kind: ParamKind) -> Result<(), WaveNetError> {
        if self.entries.contains_key(&path) {
            return Err(WaveNetError::DuplicateParameter(path));
        }
        self.entries.insert(path, kind);
        Ok(())
    }
}

/// A nested naming context over a [`ParamRegistry`].
#[derive(Debug)]
pub struct Scope<'r> {
    registry: &'r mut ParamRegistry,
    path: String,
}

impl Scope<'_> {
    /// Open a child scope; parameters created through it are prefixed with this scope's path.
    pub fn nested(&mut self, name: &str) -> Scope<'_> {
        Scope {
            path: format!("{}/{}", self.path, name),
            registry: &mut *self.registry,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn register(&mut self, name: &str, shape: &[usize], kind: ParamKind) -> Result<(), WaveNetError> {
        let path = format!("{}/{}", self.path, name);
        if shape.iter().any(|&dim| dim == 0) {
            return Err(WaveNetError::InvalidConfig(format!(
                "parameter `{path}` has an empty dimension in shape {shape:?}"
            )));
        }
        self.registry.register(path, kind)
    }

    /// Trainable tensor drawn element-wise from `Uniform(-scale, scale)`.
    pub fn uniform<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        shape: [usize; D],
        scale: f64,
        device: &B::Device,
    ) -> Result<Param<Tensor<B, D>>, WaveNetError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(WaveNetError::InvalidConfig(format!(
                "uniform scale for `{}/{name}` must be positive, got {scale}",
                self.path
            )));
        }
        self.register(name, &shape, ParamKind::Trainable)?;

        let tensor = Tensor::random(shape, Distribution::Uniform(-scale, scale), device);
        Ok(Param::from_tensor(tensor))
    }

    /// He (Kaiming) uniform initialization with `scale = sqrt(fan_scale / fan_in)`.
    ///
    /// The fan statistics follow [`fans`], computed on the logical shape given here.
    pub fn he_uniform<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        shape: [usize; D],
        fan_scale: f64,
        device: &B::Device,
    ) -> Result<Param<Tensor<B, D>>, WaveNetError> {
        let (fan_in, _) = fans(&shape);
        let scale = (fan_scale / fan_in).sqrt();
        self.uniform(name, shape, scale, device)
    }

    /// Trainable tensor with every element set to `value`.
    pub fn constant<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        shape: [usize; D],
        value: f64,
        device: &B::Device,
    ) -> Result<Param<Tensor<B, D>>, WaveNetError> {
        self.register(name, &shape, ParamKind::Trainable)?;
        Ok(Param::from_tensor(Tensor::full(shape, value, device)))
    }

    /// Non-trainable constant, used for running statistics.
    pub fn running<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        shape: [usize; D],
        value: f64,
        device: &B::Device,
    ) -> Result<RunningState<Tensor<B, D>>, WaveNetError> {
        self.register(name, &shape, ParamKind::Running)?;
        Ok(RunningState::new(Tensor::full(shape, value, device)))
    }
}

/// Compute `(fan_in, fan_out)` of a parameter shape.
///
/// - rank 2: `(shape[0], shape[1])`
/// - rank 4 or 5 (convolution kernels): the first two axes are the receptive field,
///   `(shape[-2] * rf, shape[-1] * rf)`
/// - any other rank: both are `sqrt(prod(shape))`
pub fn fans(shape: &[usize]) -> (f64, f64) {
    match shape.len() {
        2 => (shape[0] as f64, shape[1] as f64),
        4 | 5 => {
            let receptive_field = (shape[0] * shape[1]) as f64;
            let fan_in = shape[shape.len() - 2] as f64 * receptive_field;
            let fan_out = shape[shape.len() - 1] as f64 * receptive_field;
            (fan_in, fan_out)
        }
        _ => {
            let fan = (shape.iter().product::<usize>() as f64).sqrt();
            (fan, fan)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn values<const D: usize>(param: &Param<Tensor<B, D>>) -> Vec<f32> {
        param.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn fans_follow_rank_branches() {
        assert_eq!(fans(&[20, 30]), (20.0, 30.0));
        // (1, size, in, out) dilated kernel
        assert_eq!(fans(&[1, 7, 128, 64]), (7.0 * 128.0, 7.0 * 64.0));
        assert_eq!(fans(&[2, 3, 3, 4, 5]), (4.0 * 6.0, 5.0 * 6.0));

        // (size, in, out) conv1d kernel has no specific assumption
        let expected = ((7 * 128 * 128) as f64).sqrt();
        assert_eq!(fans(&[7, 128, 128]), (expected, expected));
        assert_eq!(fans(&[16]), (4.0, 4.0));
    }

    #[test]
    fn he_uniform_stays_within_scale() {
        let device = Default::default();
        let mut registry = ParamRegistry::new();
        let mut scope = registry.scope("test");

        let shapes: [&[usize]; 3] = [&[7, 128, 128], &[1, 7, 20, 128], &[64, 32]];
        let rank3 = scope.he_uniform::<B, 3>("W3", [7, 128, 128], 1.0, &device).unwrap();
        let rank4 = scope.he_uniform::<B, 4>("W4", [1, 7, 20, 128], 1.0, &device).unwrap();
        let rank2 = scope.he_uniform::<B, 2>("W2", [64, 32], 2.0, &device).unwrap();

        let scales = [
            (1.0 / fans(shapes[0]).0).sqrt(),
            (1.0 / fans(shapes[1]).0).sqrt(),
            (2.0 / fans(shapes[2]).0).sqrt(),
        ];
        let samples = [values(&rank3), values(&rank4), values(&rank2)];

        for (scale, samples) in scales.iter().zip(samples.iter()) {
            let scale = *scale as f32;
            assert!(samples.iter().all(|v| v.abs() < scale));
            // not degenerate: the draw covers a good part of the interval
            let max = samples.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
            assert!(max > scale * 0.5);
        }
    }

    #[test]
    fn constant_fills_every_element() {
        let device = Default::default();
        let mut registry = ParamRegistry::new();
        let mut scope = registry.scope("bn");

        let gamma = scope.constant::<B, 1>("gamma", [5], 1.0, &device).unwrap();
        let beta = scope.constant::<B, 2>("beta", [2, 3], -0.25, &device).unwrap();

        assert_eq!(gamma.val().dims(), [5]);
        assert_eq!(values(&gamma), vec![1.0; 5]);
        assert_eq!(beta.val().dims(), [2, 3]);
        assert_eq!(values(&beta), vec![-0.25; 6]);
    }

    #[test]
    fn nested_scopes_build_paths_and_reject_duplicates() {
        let device = Default::default();
        let mut registry = ParamRegistry::new();
        {
            let mut block = registry.scope("block_0_1");
            let mut filter = block.nested("conv_filter");
            filter.he_uniform::<B, 4>("W", [1, 7, 4, 4], 1.0, &device).unwrap();
            let err = filter
                .constant::<B, 1>("W", [4], 0.0, &device)
                .unwrap_err();
            assert_eq!(
                err,
                WaveNetError::DuplicateParameter("block_0_1/conv_filter/W".to_string())
            );

            let mut gate = block.nested("conv_gate");
            gate.running::<B, 1>("mean", [4], 0.0, &device).unwrap();
        }

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.kind("block_0_1/conv_filter/W"),
            Some(ParamKind::Trainable)
        );
        assert_eq!(
            registry.kind("block_0_1/conv_gate/mean"),
            Some(ParamKind::Running)
        );
    }

    #[test]
    fn empty_dimension_is_rejected() {
        let device = Default::default();
        let mut registry = ParamRegistry::new();
        let result = registry
            .scope("front")
            .he_uniform::<B, 3>("W", [1, 0, 8], 1.0, &device);

        assert!(matches!(result, Err(WaveNetError::InvalidConfig(_))));
        assert!(registry.is_empty());
    }
}

//! Inference units as burn modules.

use burn::{
    module::Module,
    nn::{
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
    },
    tensor::{Tensor, TensorData, backend::Backend},
};
use rand::Rng;

use super::{InferenceUnit, UnitSpec, random_values};
use crate::{Result, position::LayerKind};

/// Square convolution without bias, batch norm, ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let norm = BatchNormConfig::new(channels[1]).init(device);
        Self {
            conv,
            norm,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

/// Depthwise 3x3 block followed by a pointwise 1x1 block.
#[derive(Module, Debug)]
pub struct SeparableBlock<B: Backend> {
    depthwise: ConvBlock<B>,
    pointwise: ConvBlock<B>,
}

impl<B: Backend> SeparableBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            depthwise: ConvBlock::new([in_channels, in_channels], 3, stride, in_channels, device),
            pointwise: ConvBlock::new([in_channels, out_channels], 1, 1, 1, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(input))
    }
}

/// Average pooling over the whole feature map, flatten, fully connected.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(in_channels: usize, num_classes: usize, width: usize, device: &B::Device) -> Self {
        Self {
            pool: AvgPool2dConfig::new([width, width]).init(),
            fc: LinearConfig::new(in_channels, num_classes).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(input);
        let x: Tensor<B, 2> = x.flatten(1, 3);
        self.fc.forward(x)
    }
}

#[derive(Debug)]
enum Network<B: Backend> {
    Conv(ConvBlock<B>),
    Separable(SeparableBlock<B>),
    Head(ClassifierHead<B>),
}

/// A freshly initialized burn network for one [`UnitSpec`].
#[derive(Debug)]
pub struct BurnUnit<B: Backend> {
    spec: UnitSpec,
    device: B::Device,
    network: Network<B>,
}

impl<B: Backend> BurnUnit<B> {
    pub fn build(spec: &UnitSpec, device: &B::Device) -> Result<Self> {
        spec.validate()?;
        let network = match spec.kind {
            LayerKind::ConvBlock { stride } => Network::Conv(ConvBlock::new(
                [spec.in_channels, spec.out_channels],
                3,
                stride,
                1,
                device,
            )),
            LayerKind::SeparableBlock { stride } => Network::Separable(SeparableBlock::new(
                spec.in_channels,
                spec.out_channels,
                stride,
                device,
            )),
            LayerKind::ClassifierHead => Network::Head(ClassifierHead::new(
                spec.in_channels,
                spec.out_channels,
                spec.width,
                device,
            )),
        };
        Ok(Self {
            spec: *spec,
            device: device.clone(),
            network,
        })
    }

    /// Output shape of a forward pass; used to check the network is wired as described.
    pub fn forward_shape(&self, input: Tensor<B, 4>) -> Vec<usize> {
        match &self.network {
            Network::Conv(block) => block.forward(input).dims().to_vec(),
            Network::Separable(block) => block.forward(input).dims().to_vec(),
            Network::Head(head) => head.forward(input).dims().to_vec(),
        }
    }
}

impl<B: Backend> InferenceUnit for BurnUnit<B> {
    type Input = Tensor<B, 4>;

    fn random_input<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self::Input> {
        let values = random_values(self.spec.input_len(), rng);
        Ok(Tensor::from_data(
            TensorData::new(values, self.spec.input_shape()),
            &self.device,
        ))
    }

    fn infer(&self, input: Self::Input) -> Result<()> {
        match &self.network {
            Network::Conv(block) => {
                let _output = block.forward(input);
                B::sync(&self.device);
            }
            Network::Separable(block) => {
                let _output = block.forward(input);
                B::sync(&self.device);
            }
            Network::Head(head) => {
                let _output = head.forward(input);
                B::sync(&self.device);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use burn::backend::NdArray;
    use rand::{SeedableRng, rngs::StdRng};
    use rstest::rstest;

    use super::*;

    type B = NdArray;

    #[rstest]
    #[case::conv(LayerKind::ConvBlock { stride: 1 }, 3, 4, 8)]
    #[case::strided_conv(LayerKind::ConvBlock { stride: 2 }, 2, 5, 8)]
    #[case::separable(LayerKind::SeparableBlock { stride: 2 }, 4, 6, 8)]
    #[case::head(LayerKind::ClassifierHead, 5, 10, 8)]
    fn test_burn_unit_matches_spec_shapes(
        #[case] kind: LayerKind,
        #[case] in_channels: usize,
        #[case] out_channels: usize,
        #[case] width: usize,
    ) -> anyhow::Result<()> {
        let device = Default::default();
        let spec = UnitSpec {
            kind,
            in_channels,
            out_channels,
            width,
            batch: 2,
        };
        let unit = BurnUnit::<B>::build(&spec, &device)?;
        let mut rng = StdRng::seed_from_u64(7);
        let input = unit.random_input(&mut rng)?;
        assert_eq!(input.dims().to_vec(), spec.input_shape().to_vec());
        assert_eq!(unit.forward_shape(input), spec.output_shape());

        unit.infer(unit.random_input(&mut rng)?)?;
        Ok(())
    }

    #[test]
    fn test_burn_unit_rejects_invalid_spec() {
        let spec = UnitSpec {
            kind: LayerKind::ConvBlock { stride: 1 },
            in_channels: 0,
            out_channels: 1,
            width: 8,
            batch: 1,
        };
        assert!(BurnUnit::<B>::build(&spec, &Default::default()).is_err());
    }
}

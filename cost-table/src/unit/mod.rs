//! Model factory: minimal inference-only units sized to one channel configuration.
//!
//! A [`UnitSpec`] describes what to build. [`burn_net`] turns it into a burn
//! module, [`onnx`] into an ONNX graph that [`tract_plan`] runs in-process or
//! that external benchmark tools load from disk.

pub mod burn_net;
pub mod onnx;
pub mod tract_plan;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    CostTableError, Result,
    position::{LayerKind, LayerPosition},
};

/// Description of one inference unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub kind: LayerKind,
    pub in_channels: usize,
    /// Number of classes for the classifier head.
    pub out_channels: usize,
    pub width: usize,
    pub batch: usize,
}

impl UnitSpec {
    /// Spec of the unit measured at cell `(in_channels, out_channels)` of `position`.
    /// For the classifier head `out_channels` is ignored.
    pub fn for_cell(
        position: &LayerPosition,
        in_channels: usize,
        out_channels: usize,
        batch: usize,
    ) -> Self {
        let out_channels = if position.kind.is_head() {
            position.max_out_channels
        } else {
            out_channels
        };
        Self {
            kind: position.kind,
            in_channels,
            out_channels,
            width: position.width,
            batch,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(CostTableError::InvalidUnit(format!(
                "channel counts must be positive, got ({}, {})",
                self.in_channels, self.out_channels
            )));
        }
        if self.width == 0 || self.batch == 0 {
            return Err(CostTableError::InvalidUnit(format!(
                "width and batch must be positive, got width={} batch={}",
                self.width, self.batch
            )));
        }
        if let Some(stride) = self.kind.stride() {
            if !(1..=2).contains(&stride) {
                return Err(CostTableError::InvalidUnit(format!(
                    "unsupported stride {stride}"
                )));
            }
        }
        Ok(())
    }

    /// NCHW input shape.
    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.in_channels, self.width, self.width]
    }

    /// Output shape: NCHW for the blocks, `[batch, classes]` for the head.
    pub fn output_shape(&self) -> Vec<usize> {
        match self.kind.stride() {
            // 3x3 kernel with padding 1
            Some(stride) => {
                let out_width = (self.width - 1) / stride + 1;
                vec![self.batch, self.out_channels, out_width, out_width]
            }
            None => vec![self.batch, self.out_channels],
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_shape().iter().product()
    }
}

/// Something that runs a single forward pass on a prepared input.
pub trait InferenceUnit {
    type Input;

    /// Draws a fresh input with values uniform in `[0, 1)`.
    fn random_input<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self::Input>;

    /// Runs one forward pass; returns once the result is available.
    fn infer(&self, input: Self::Input) -> Result<()>;
}

pub(crate) fn random_values<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f32> {
    (0..n).map(|_| rng.gen::<f32>()).collect()
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn conv(in_channels: usize, out_channels: usize, width: usize, stride: usize) -> UnitSpec {
        UnitSpec {
            kind: LayerKind::ConvBlock { stride },
            in_channels,
            out_channels,
            width,
            batch: 1,
        }
    }

    #[test]
    fn test_head_ignores_swept_out_channels() {
        let position = LayerPosition {
            name: "FC".into(),
            kind: LayerKind::ClassifierHead,
            width: 8,
            max_in_channels: 4,
            max_out_channels: 10,
        };
        let spec = UnitSpec::for_cell(&position, 3, 1, 2);
        assert_eq!(spec.out_channels, 10);
        assert_eq!(spec.input_shape(), [2, 3, 8, 8]);
        assert_eq!(spec.output_shape(), vec![2, 10]);
    }

    #[rstest]
    #[case(32, 1, 32)]
    #[case(32, 2, 16)]
    #[case(7, 2, 4)]
    fn test_block_output_width(#[case] width: usize, #[case] stride: usize, #[case] expected: usize) {
        assert_eq!(conv(2, 5, width, stride).output_shape(), vec![1, 5, expected, expected]);
    }

    #[rstest]
    #[case(conv(0, 1, 8, 1))]
    #[case(conv(1, 0, 8, 1))]
    #[case(conv(1, 1, 0, 1))]
    #[case(conv(1, 1, 8, 3))]
    #[case(UnitSpec { batch: 0, ..conv(1, 1, 8, 1) })]
    fn test_invalid_spec_is_rejected(#[case] spec: UnitSpec) {
        assert!(matches!(spec.validate(), Err(CostTableError::InvalidUnit(_))));
    }
}

//! Enumeration of the layer positions at which latency is measured.

use serde::{Deserialize, Serialize};

use crate::{CostTableError, Result};

/// Input resolution the reference architectures are defined for.
pub const SUPPORTED_IMG_SIZE: usize = 32;
/// Input image channels (RGB).
pub const IMAGE_CHANNELS: usize = 3;
/// Stride applied by the first convolution and then by each of the three stages.
const STRIDES: [usize; 4] = [1, 1, 2, 2];
const NUM_STAGES: usize = 3;
/// Upper bound on any channel or class count; keeps table sizes representable.
pub const MAX_CHANNELS: usize = 1 << 16;

/// The operator pattern measured at a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub enum LayerKind {
    /// 3x3 convolution followed by batch norm and ReLU.
    #[display("conv3x3(stride={stride})")]
    ConvBlock { stride: usize },
    /// 3x3 depthwise convolution then 1x1 pointwise convolution, each with batch norm and ReLU.
    #[display("separable(stride={stride})")]
    SeparableBlock { stride: usize },
    /// Global average pooling, flatten and a fully connected projection.
    #[display("classifier")]
    ClassifierHead,
}

impl LayerKind {
    pub fn stride(&self) -> Option<usize> {
        match self {
            LayerKind::ConvBlock { stride } | LayerKind::SeparableBlock { stride } => Some(*stride),
            LayerKind::ClassifierHead => None,
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, LayerKind::ClassifierHead)
    }
}

/// A named point of the architecture with the channel bounds swept there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPosition {
    pub name: String,
    pub kind: LayerKind,
    /// Width (and height) of the feature map entering the layer.
    pub width: usize,
    pub max_in_channels: usize,
    /// For the classifier head this is the number of classes.
    pub max_out_channels: usize,
}

impl LayerPosition {
    /// Number of cells of the cost table of this position.
    pub fn num_cells(&self) -> usize {
        self.max_in_channels * self.max_out_channels
    }

    /// Number of measurements a full sweep of this position takes.
    pub fn num_measurements(&self) -> usize {
        if self.kind.is_head() {
            self.max_in_channels
        } else {
            self.num_cells()
        }
    }
}

/// Network families whose positions can be enumerated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, derive_more::Display)]
pub enum NetFamily {
    /// Wide residual network: 3x3 conv blocks, channels `(16, 16w, 32w, 64w)`.
    #[display("wrn")]
    WideResNet,
    /// MobileNetV1: depthwise-separable blocks, channels `(16, 32w, 64w, 128w)`.
    #[display("mobilenetv1")]
    MobileNetV1,
}

impl NetFamily {
    fn base_channels(&self) -> [usize; 4] {
        match self {
            NetFamily::WideResNet => [16, 16, 32, 64],
            NetFamily::MobileNetV1 => [16, 32, 64, 128],
        }
    }

    fn stage_kind(&self, stride: usize) -> LayerKind {
        match self {
            NetFamily::WideResNet => LayerKind::ConvBlock { stride },
            NetFamily::MobileNetV1 => LayerKind::SeparableBlock { stride },
        }
    }
}

/// Structural parameters of the reference architecture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub family: NetFamily,
    pub depth: usize,
    pub width: f64,
    pub img_size: usize,
    pub num_classes: usize,
}

impl Architecture {
    pub fn validate(&self) -> Result<()> {
        if self.img_size != SUPPORTED_IMG_SIZE {
            return Err(CostTableError::Config(format!(
                "unsupported input resolution {} (only {SUPPORTED_IMG_SIZE} is supported)",
                self.img_size
            )));
        }
        if self.num_classes == 0 || self.num_classes > MAX_CHANNELS {
            return Err(CostTableError::Config(format!(
                "num_classes must be in 1..={MAX_CHANNELS}, got {}",
                self.num_classes
            )));
        }
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(CostTableError::Config(format!(
                "width multiplier must be positive, got {}",
                self.width
            )));
        }
        if self.family == NetFamily::WideResNet && (self.depth < 10 || (self.depth - 4) % 6 != 0) {
            return Err(CostTableError::Config(format!(
                "wide resnet depth must be 6n+4 with n >= 1, got {}",
                self.depth
            )));
        }
        Ok(())
    }

    /// Channel counts after the first convolution and after each stage.
    pub fn channels(&self) -> Result<[usize; 4]> {
        let base = self.family.base_channels();
        let mut channels = base;
        // the first convolution is never widened
        for (c, b) in channels.iter_mut().zip(base).skip(1) {
            let widened = (b as f64 * self.width).floor();
            if widened < 1.0 {
                return Err(CostTableError::Config(format!(
                    "width multiplier {} leaves a stage without channels",
                    self.width
                )));
            }
            if widened > MAX_CHANNELS as f64 {
                return Err(CostTableError::Config(format!(
                    "width multiplier {} gives more than {MAX_CHANNELS} channels",
                    self.width
                )));
            }
            *c = widened as usize;
        }
        Ok(channels)
    }

    /// Enumerates the positions in a fixed order: `Conv_0`, then `Stride_i` and
    /// `No_Stride_i` for each stage, then `FC`.
    pub fn positions(&self) -> Result<Vec<LayerPosition>> {
        self.validate()?;
        let channels = self.channels()?;
        let mut fm_sizes = [0; 4];
        fm_sizes[0] = self.img_size / STRIDES[0];
        for i in 1..4 {
            fm_sizes[i] = fm_sizes[i - 1] / STRIDES[i];
        }

        let mut positions = Vec::with_capacity(2 * NUM_STAGES + 2);
        positions.push(LayerPosition {
            name: "Conv_0".to_string(),
            kind: LayerKind::ConvBlock { stride: STRIDES[0] },
            width: self.img_size,
            max_in_channels: IMAGE_CHANNELS,
            max_out_channels: channels[0],
        });
        for i in 1..=NUM_STAGES {
            positions.push(LayerPosition {
                name: format!("Stride_{i}"),
                kind: self.family.stage_kind(STRIDES[i]),
                width: fm_sizes[i - 1],
                max_in_channels: channels[i - 1],
                max_out_channels: channels[i],
            });
            positions.push(LayerPosition {
                name: format!("No_Stride_{i}"),
                kind: self.family.stage_kind(1),
                width: fm_sizes[i],
                max_in_channels: channels[i],
                max_out_channels: channels[i],
            });
        }
        positions.push(LayerPosition {
            name: "FC".to_string(),
            kind: LayerKind::ClassifierHead,
            width: fm_sizes[NUM_STAGES],
            max_in_channels: channels[NUM_STAGES],
            max_out_channels: self.num_classes,
        });
        Ok(positions)
    }
}

/// Which enumerated positions a sweep covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PositionSelection {
    #[default]
    All,
    Named(Vec<String>),
}

impl PositionSelection {
    /// Keeps the selected positions, in enumeration order.
    pub fn select(&self, positions: Vec<LayerPosition>) -> Result<Vec<LayerPosition>> {
        let PositionSelection::Named(names) = self else {
            return Ok(positions);
        };
        if names.is_empty() {
            return Err(CostTableError::Config("no position selected".into()));
        }
        if let Some(unknown) = names
            .iter()
            .find(|name| !positions.iter().any(|p| &p.name == *name))
        {
            return Err(CostTableError::Config(format!(
                "unknown position {unknown:?}, expected one of {}",
                itertools::join(positions.iter().map(|p| p.name.as_str()), ", ")
            )));
        }
        Ok(positions
            .into_iter()
            .filter(|p| names.contains(&p.name))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn wrn(depth: usize, width: f64) -> Architecture {
        Architecture {
            family: NetFamily::WideResNet,
            depth,
            width,
            img_size: 32,
            num_classes: 10,
        }
    }

    #[test]
    fn test_wrn_positions_order_and_bounds() -> anyhow::Result<()> {
        let positions = wrn(40, 2.0).positions()?;
        let names: Vec<_> = positions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Conv_0",
                "Stride_1",
                "No_Stride_1",
                "Stride_2",
                "No_Stride_2",
                "Stride_3",
                "No_Stride_3",
                "FC"
            ]
        );

        let conv0 = &positions[0];
        assert_eq!((conv0.max_in_channels, conv0.max_out_channels), (3, 16));
        assert_eq!(conv0.width, 32);

        let stride2 = &positions[3];
        assert_eq!(stride2.kind, LayerKind::ConvBlock { stride: 2 });
        assert_eq!((stride2.max_in_channels, stride2.max_out_channels), (32, 64));
        assert_eq!(stride2.width, 32);

        let no_stride3 = &positions[6];
        assert_eq!(no_stride3.kind, LayerKind::ConvBlock { stride: 1 });
        assert_eq!((no_stride3.max_in_channels, no_stride3.width), (128, 8));

        let fc = &positions[7];
        assert_eq!(fc.kind, LayerKind::ClassifierHead);
        assert_eq!((fc.max_in_channels, fc.max_out_channels, fc.width), (128, 10, 8));
        assert_eq!(fc.num_measurements(), 128);
        Ok(())
    }

    #[test]
    fn test_mobilenet_positions_use_separable_blocks() -> anyhow::Result<()> {
        let arch = Architecture {
            family: NetFamily::MobileNetV1,
            ..wrn(40, 1.0)
        };
        let positions = arch.positions()?;
        assert_eq!(positions[0].kind, LayerKind::ConvBlock { stride: 1 });
        assert_eq!(positions[1].kind, LayerKind::SeparableBlock { stride: 1 });
        assert_eq!(positions[3].kind, LayerKind::SeparableBlock { stride: 2 });
        assert_eq!(positions[7].max_in_channels, 128);
        Ok(())
    }

    #[rstest]
    #[case::resolution(Architecture { img_size: 64, ..wrn(40, 2.0) })]
    #[case::depth(wrn(41, 2.0))]
    #[case::shallow(wrn(4, 2.0))]
    #[case::width(wrn(40, 0.0))]
    #[case::narrow(wrn(40, 0.01))]
    #[case::huge_width(wrn(40, 1e30))]
    #[case::many_classes(Architecture { num_classes: MAX_CHANNELS + 1, ..wrn(40, 2.0) })]
    #[case::classes(Architecture { num_classes: 0, ..wrn(40, 2.0) })]
    fn test_invalid_architecture_is_rejected(#[case] arch: Architecture) {
        assert!(matches!(arch.positions(), Err(CostTableError::Config(_))));
    }

    #[test]
    fn test_widest_architecture_counts_cells() -> anyhow::Result<()> {
        // 64 * 1024 stays within the channel bound
        let positions = wrn(40, 1024.0).positions()?;
        let widest = &positions[6];
        assert_eq!(widest.max_in_channels, MAX_CHANNELS);
        assert_eq!(widest.num_cells(), MAX_CHANNELS * MAX_CHANNELS);
        Ok(())
    }

    #[test]
    fn test_named_selection_keeps_enumeration_order() -> anyhow::Result<()> {
        let positions = wrn(16, 1.0).positions()?;
        let selection = PositionSelection::Named(vec!["FC".into(), "Stride_1".into()]);
        let selected = selection.select(positions)?;
        let names: Vec<_> = selected.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Stride_1", "FC"]);
        Ok(())
    }

    #[test]
    fn test_unknown_selection_is_rejected() -> anyhow::Result<()> {
        let positions = wrn(16, 1.0).positions()?;
        let selection = PositionSelection::Named(vec!["Stride_4".into()]);
        assert!(matches!(
            selection.select(positions),
            Err(CostTableError::Config(_))
        ));
        Ok(())
    }
}

//! Inference units compiled and run by tract.

use rand::Rng;
use tract_onnx::prelude::*;

use super::{InferenceUnit, UnitSpec, onnx, random_values};
use crate::{CostTableError, Result};

/// An optimized tract plan for one [`UnitSpec`].
pub struct TractUnit {
    spec: UnitSpec,
    plan: TypedRunnableModel<TypedModel>,
}

impl TractUnit {
    /// Exports `spec` to ONNX with random weights and compiles it.
    pub fn build<R: Rng + ?Sized>(spec: &UnitSpec, rng: &mut R) -> Result<Self> {
        let proto = onnx::export(spec, rng)?;
        let plan = tract_onnx::onnx()
            .model_for_proto_model(&proto)
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(CostTableError::backend)?;
        Ok(Self { spec: *spec, plan })
    }

    /// Runs one pass and returns the output shape.
    pub fn output_shape(&self, input: Tensor) -> Result<Vec<usize>> {
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(CostTableError::backend)?;
        outputs
            .first()
            .map(|o| o.shape().to_vec())
            .ok_or_else(|| CostTableError::Backend("plan produced no output".into()))
    }
}

impl InferenceUnit for TractUnit {
    type Input = Tensor;

    fn random_input<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self::Input> {
        let values = random_values(self.spec.input_len(), rng);
        Tensor::from_shape(&self.spec.input_shape(), &values).map_err(CostTableError::backend)
    }

    fn infer(&self, input: Self::Input) -> Result<()> {
        self.plan
            .run(tvec!(input.into()))
            .map_err(CostTableError::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rand::{SeedableRng, rngs::StdRng};
    use rstest::rstest;

    use super::*;
    use crate::position::LayerKind;

    #[rstest]
    #[case::conv(LayerKind::ConvBlock { stride: 1 }, 3, 4)]
    #[case::strided_conv(LayerKind::ConvBlock { stride: 2 }, 2, 5)]
    #[case::separable(LayerKind::SeparableBlock { stride: 2 }, 4, 6)]
    #[case::head(LayerKind::ClassifierHead, 5, 10)]
    fn test_tract_unit_runs_exported_graph(
        #[case] kind: LayerKind,
        #[case] in_channels: usize,
        #[case] out_channels: usize,
    ) -> anyhow::Result<()> {
        let spec = UnitSpec {
            kind,
            in_channels,
            out_channels,
            width: 8,
            batch: 1,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let unit = TractUnit::build(&spec, &mut rng)?;
        let input = unit.random_input(&mut rng)?;
        assert_eq!(unit.output_shape(input)?, spec.output_shape());
        unit.infer(unit.random_input(&mut rng)?)?;
        Ok(())
    }
}

//! Export of inference units as ONNX graphs.

use rand::Rng;
use tract_onnx::pb::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto, attribute_proto::AttributeType,
    tensor_proto::DataType, tensor_shape_proto, type_proto,
};

use super::UnitSpec;
use crate::{Result, position::LayerKind};

pub const INPUT_NAME: &str = "input";
pub const OUTPUT_NAME: &str = "output";
const OPSET_VERSION: i64 = 13;
const IR_VERSION: i64 = 7;
const BN_EPSILON: f32 = 1e-5;
/// Random weights are drawn uniformly from `[-WEIGHT_RANGE, WEIGHT_RANGE)`.
const WEIGHT_RANGE: f32 = 0.1;

fn int_attr(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        ..Default::default()
    }
}

fn ints_attr(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Ints as i32,
        ints: values.to_vec(),
        ..Default::default()
    }
}

fn float_attr(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Float as i32,
        f: value,
        ..Default::default()
    }
}

fn value_info(name: &str, shape: &[usize]) -> ValueInfoProto {
    let dim = shape
        .iter()
        .map(|d| tensor_shape_proto::Dimension {
            value: Some(tensor_shape_proto::dimension::Value::DimValue(*d as i64)),
            ..Default::default()
        })
        .collect();
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Accumulates nodes and initializers of a straight-line graph.
struct GraphBuilder<'r, R: ?Sized> {
    rng: &'r mut R,
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    last: String,
}

impl<'r, R: Rng + ?Sized> GraphBuilder<'r, R> {
    fn new(rng: &'r mut R) -> Self {
        Self {
            rng,
            nodes: vec![],
            initializers: vec![],
            last: INPUT_NAME.to_string(),
        }
    }

    fn constant(&mut self, dims: &[usize], float_data: Vec<f32>) -> String {
        let name = format!("w{}", self.initializers.len());
        self.initializers.push(TensorProto {
            name: name.clone(),
            dims: dims.iter().map(|d| *d as i64).collect(),
            data_type: DataType::Float as i32,
            float_data,
            ..Default::default()
        });
        name
    }

    fn random(&mut self, dims: &[usize]) -> String {
        let n = dims.iter().product();
        let data = (0..n)
            .map(|_| self.rng.gen_range(-WEIGHT_RANGE..WEIGHT_RANGE))
            .collect();
        self.constant(dims, data)
    }

    fn filled(&mut self, dims: &[usize], value: f32) -> String {
        let n = dims.iter().product();
        self.constant(dims, vec![value; n])
    }

    /// Appends `op_type` applied to the previous output and `params`.
    fn push(&mut self, op_type: &str, params: Vec<String>, attribute: Vec<AttributeProto>) {
        let output = format!("{}_{}", op_type.to_lowercase(), self.nodes.len());
        let mut input = vec![self.last.clone()];
        input.extend(params);
        self.nodes.push(NodeProto {
            name: output.clone(),
            op_type: op_type.to_string(),
            input,
            output: vec![output.clone()],
            attribute,
            ..Default::default()
        });
        self.last = output;
    }

    fn conv_bn_relu(
        &mut self,
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        groups: usize,
    ) {
        let [in_channels, out_channels] = channels;
        let pad = (kernel_size / 2) as i64;
        let kernel = self.random(&[out_channels, in_channels / groups, kernel_size, kernel_size]);
        self.push(
            "Conv",
            vec![kernel],
            vec![
                ints_attr("kernel_shape", &[kernel_size as i64, kernel_size as i64]),
                ints_attr("strides", &[stride as i64, stride as i64]),
                ints_attr("pads", &[pad, pad, pad, pad]),
                int_attr("group", groups as i64),
            ],
        );
        let scale = self.filled(&[out_channels], 1.0);
        let bias = self.filled(&[out_channels], 0.0);
        let mean = self.filled(&[out_channels], 0.0);
        let var = self.filled(&[out_channels], 1.0);
        self.push(
            "BatchNormalization",
            vec![scale, bias, mean, var],
            vec![float_attr("epsilon", BN_EPSILON)],
        );
        self.push("Relu", vec![], vec![]);
    }

    fn classifier(&mut self, in_channels: usize, num_classes: usize, width: usize) {
        let w = width as i64;
        self.push("AveragePool", vec![], vec![ints_attr("kernel_shape", &[w, w])]);
        self.push("Flatten", vec![], vec![int_attr("axis", 1)]);
        let weights = self.random(&[num_classes, in_channels]);
        let bias = self.random(&[num_classes]);
        self.push("Gemm", vec![weights, bias], vec![int_attr("transB", 1)]);
    }

    fn finish(mut self, spec: &UnitSpec) -> ModelProto {
        // rename the last output so the graph has a stable output name
        if let Some(last) = self.nodes.last_mut() {
            last.output = vec![OUTPUT_NAME.to_string()];
        }
        let graph = GraphProto {
            name: "unit".to_string(),
            node: self.nodes,
            initializer: self.initializers,
            input: vec![value_info(INPUT_NAME, &spec.input_shape())],
            output: vec![value_info(OUTPUT_NAME, &spec.output_shape())],
            ..Default::default()
        };
        ModelProto {
            ir_version: IR_VERSION,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
            }],
            graph: Some(graph),
            ..Default::default()
        }
    }
}

/// Builds the ONNX graph of `spec` with random weights.
pub fn export<R: Rng + ?Sized>(spec: &UnitSpec, rng: &mut R) -> Result<ModelProto> {
    spec.validate()?;
    let mut graph = GraphBuilder::new(rng);
    match spec.kind {
        LayerKind::ConvBlock { stride } => {
            graph.conv_bn_relu([spec.in_channels, spec.out_channels], 3, stride, 1);
        }
        LayerKind::SeparableBlock { stride } => {
            graph.conv_bn_relu([spec.in_channels, spec.in_channels], 3, stride, spec.in_channels);
            graph.conv_bn_relu([spec.in_channels, spec.out_channels], 1, 1, 1);
        }
        LayerKind::ClassifierHead => {
            graph.classifier(spec.in_channels, spec.out_channels, spec.width);
        }
    }
    Ok(graph.finish(spec))
}

/// Serialized form of [`export`], as written to disk for external tools.
pub fn export_bytes<R: Rng + ?Sized>(spec: &UnitSpec, rng: &mut R) -> Result<Vec<u8>> {
    use prost_tract_compat::Message;

    Ok(export(spec, rng)?.encode_to_vec())
}

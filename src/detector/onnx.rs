// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/detector/onnx.rs - tract-onnx 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage, imageops};
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::detect::{LetterboxGeometry, ModelGeometry, ModelOutputShape, decode};
use crate::detector::{Detector, DetectorError, RawOutput};

/// 信箱化补边的默认底色（YOLO 惯例的灰色）
const LETTERBOX_BG: u8 = 114;
/// 默认模型输入尺寸
const DEFAULT_INPUT_SIZE: u32 = 640;

type OnnxModel = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// 基于 tract-onnx 的检测器后端
///
/// 模型在构造时加载并优化一次；输出布局分类同样在加载时
/// 判定并缓存，整个进程生命周期内不再变化。
pub struct OnnxDetector {
  model: OnnxModel,
  geometry: ModelGeometry,
  output_shape: ModelOutputShape,
}

impl OnnxDetector {
  pub fn new(model_path: &str) -> Result<Self, DetectorError> {
    Self::with_input_size(model_path, DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
  }

  pub fn with_input_size(model_path: &str, width: u32, height: u32) -> Result<Self, DetectorError> {
    info!("加载模型文件: {}", model_path);
    let model = tract_onnx::onnx()
      .model_for_path(model_path)
      .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec![1, 3, height as usize, width as usize]),
      )
      .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
      .into_optimized()
      .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;

    // 读取输出张量通道深度，加载时分类一次
    let outputs = model
      .output_outlets()
      .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
      .len();
    let mut channel_depths = Vec::with_capacity(outputs);
    for i in 0..outputs {
      let fact = model
        .output_fact(i)
        .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
      let depth = fact
        .shape
        .as_concrete()
        .and_then(|dims| dims.get(1).copied())
        .unwrap_or(0);
      channel_depths.push(depth);
    }
    debug!("模型输出个数: {}, 通道深度: {:?}", outputs, channel_depths);
    let output_shape = decode::classify_output_shape(&channel_depths);
    info!("模型输出布局: {:?}", output_shape);

    let model = model
      .into_runnable()
      .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;

    Ok(Self {
      model,
      geometry: ModelGeometry {
        width,
        height,
        channel: 3,
      },
      output_shape,
    })
  }
}

impl Detector for OnnxDetector {
  fn infer(&mut self, image: &RgbImage) -> Result<RawOutput, DetectorError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(DetectorError::InvalidInput("空图像".to_string()));
    }

    let (canvas, letterbox) = letterbox_image(image, self.geometry.width, self.geometry.height);

    let (width, height) = (self.geometry.width as usize, self.geometry.height as usize);
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    let outputs = self
      .model
      .run(tvec![Tensor::from(input).into()])
      .map_err(|e| DetectorError::Inference(e.to_string()))?;

    let mut tensors = Vec::with_capacity(outputs.len());
    for output in outputs.iter() {
      let view = output
        .to_array_view::<f32>()
        .map_err(|e| DetectorError::Inference(e.to_string()))?;
      tensors.push(view.iter().copied().collect());
    }

    Ok(RawOutput { tensors, letterbox })
  }

  fn geometry(&self) -> ModelGeometry {
    self.geometry
  }

  fn output_shape(&self) -> ModelOutputShape {
    self.output_shape
  }
}

/// 保持纵横比缩放并居中补边到模型输入尺寸
fn letterbox_image(image: &RgbImage, width: u32, height: u32) -> (RgbImage, LetterboxGeometry) {
  let scale = (width as f32 / image.width() as f32).min(height as f32 / image.height() as f32);
  let new_width = ((image.width() as f32 * scale).round() as u32).max(1);
  let new_height = ((image.height() as f32 * scale).round() as u32).max(1);

  let resized = imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle);

  let x_pad = (width - new_width) / 2;
  let y_pad = (height - new_height) / 2;
  let mut canvas = RgbImage::from_pixel(width, height, Rgb([LETTERBOX_BG; 3]));
  imageops::replace(&mut canvas, &resized, x_pad as i64, y_pad as i64);

  (
    canvas,
    LetterboxGeometry {
      scale,
      x_pad: x_pad as f32,
      y_pad: y_pad as f32,
    },
  )
}

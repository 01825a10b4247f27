// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/detector/mod.rs - 检测器协作接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod onnx;

use image::RgbImage;
use thiserror::Error;

pub use onnx::OnnxDetector;

use crate::detect::{LetterboxGeometry, ModelGeometry, ModelOutputShape};

/// 检测器一次推理的原始输出
///
/// 张量内容对流水线不透明，只有解码器理解其布局；信箱化几何
/// 由检测器的预处理步骤生成，供解码器反变换坐标使用。
pub struct RawOutput {
  pub tensors: Vec<Vec<f32>>,
  pub letterbox: LetterboxGeometry,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("输入图像无效: {0}")]
  InvalidInput(String),
}

/// 检测器协作接口
///
/// 模型在构造时加载一次，上下文由捕获/推理流水线独占，
/// 直到流水线销毁。推理失败对流水线而言不是致命错误，
/// 该帧按空结果处理。
pub trait Detector: Send {
  /// 对一帧 RGB 图像执行推理，返回原始输出张量
  fn infer(&mut self, image: &RgbImage) -> Result<RawOutput, DetectorError>;

  /// 模型输入几何
  fn geometry(&self) -> ModelGeometry;

  /// 加载时缓存的输出布局分类
  fn output_shape(&self) -> ModelOutputShape;
}

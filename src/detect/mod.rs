// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/detect/mod.rs - 检测结果数据模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub mod decode;

use chrono::{DateTime, Utc};

pub use decode::{LetterboxGeometry, ModelGeometry, ModelOutputShape, post_process};

/// 单帧最多保留的检测数量
pub const MAX_DETECTIONS: usize = 128;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 类别索引解析为名称，越界返回 "unknown"
pub fn coco_cls_to_name(class_id: i32) -> &'static str {
  usize::try_from(class_id)
    .ok()
    .and_then(|id| COCO_CLASSES.get(id).copied())
    .unwrap_or("unknown")
}

/// 边界框，原始图像（去信箱化后）的像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxRect {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

/// 单个检测结果
#[derive(Clone, Debug)]
pub struct Detection {
  /// 边界框
  pub rect: BoxRect,
  /// 综合置信度（物体置信度 × 类别分数）
  pub score: f32,
  /// 类别索引
  pub class_id: i32,
  /// 类别名称
  pub name: String,
}

impl Detection {
  /// 检测结果是否合法
  ///
  /// 检测器是不可信的外部生产者，消费侧必须过滤而不是假设
  /// 数据一定合法。
  pub fn is_valid(&self) -> bool {
    self.score > 0.0
      && self.class_id >= 0
      && self.rect.left < self.rect.right
      && self.rect.top < self.rect.bottom
  }

  /// 在合法性之外再检查边界框是否完全落在图像内
  pub fn is_valid_in(&self, width: u32, height: u32) -> bool {
    self.is_valid()
      && self.rect.left >= 0
      && self.rect.top >= 0
      && self.rect.right < width as i32
      && self.rect.bottom < height as i32
  }
}

/// 一帧的检测结果，通道上传递的单位
///
/// 由解码器每帧生成一次，生成后不可变；构造时强制 128 条上限。
#[derive(Clone, Debug)]
pub struct DetectionBatch {
  detections: Vec<Detection>,
  pub timestamp: DateTime<Utc>,
}

impl DetectionBatch {
  pub fn new(mut detections: Vec<Detection>, timestamp: DateTime<Utc>) -> Self {
    detections.truncate(MAX_DETECTIONS);
    Self {
      detections,
      timestamp,
    }
  }

  /// 推理失败时该帧对应的空结果
  pub fn empty(timestamp: DateTime<Utc>) -> Self {
    Self {
      detections: Vec::new(),
      timestamp,
    }
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn count(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

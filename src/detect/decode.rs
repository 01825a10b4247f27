// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/detect/decode.rs - 模型输出解码、NMS 与坐标反变换
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::{debug, warn};

use crate::detect::{BoxRect, Detection, MAX_DETECTIONS, coco_cls_to_name};

/// 类别数量（COCO）
const NUM_CLASSES: usize = 80;
/// 标准布局每个候选框的通道数: 4 框 + 1 物体置信度 + 80 类别分数
const ROW_CHANNELS: usize = 4 + 1 + NUM_CLASSES;
/// 简化布局的三元组通道深度: 框回归 / 类别 / 物体置信度
const SIMPLIFIED_TRIPLET: [usize; 3] = [64, 80, 1];

/// 模型输入几何
#[derive(Clone, Copy, Debug)]
pub struct ModelGeometry {
  pub width: u32,
  pub height: u32,
  pub channel: u32,
}

/// 信箱化（letterbox）几何：缩放系数与补边偏移
///
/// 由预处理一侧生成，解码器只用它把坐标反变换回原图空间。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LetterboxGeometry {
  pub scale: f32,
  pub x_pad: f32,
  pub y_pad: f32,
}

impl Default for LetterboxGeometry {
  fn default() -> Self {
    Self {
      scale: 1.0,
      x_pad: 0.0,
      y_pad: 0.0,
    }
  }
}

/// 模型输出布局分类
///
/// 模型加载时根据输出张量个数与通道深度判断一次，之后缓存。
/// `Unknown` 表示无法识别的布局，解码时退回标准布局解析，
/// 但对调用方保持可区分，不与确认的 `Standard` 混为一谈。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelOutputShape {
  /// 3 个输出，每个 85 通道（4 框 + 1 物体置信度 + 80 类别）
  Standard,
  /// 9 个输出，按 {64, 80, 1} 三元组重复三次
  Simplified,
  /// 无法识别，按标准布局兼容解析
  Unknown,
}

/// 根据输出张量的通道深度分类模型布局
pub fn classify_output_shape(channel_depths: &[usize]) -> ModelOutputShape {
  if channel_depths.len() == 3 && channel_depths.iter().all(|&c| c == ROW_CHANNELS) {
    debug!("模型布局识别: 标准布局（3 个输出，每个 85 通道）");
    return ModelOutputShape::Standard;
  }

  if channel_depths.len() == 9
    && channel_depths
      .iter()
      .enumerate()
      .all(|(i, &c)| c == SIMPLIFIED_TRIPLET[i % 3])
  {
    debug!("模型布局识别: 简化布局（9 个输出，{{64, 80, 1}} 三元组）");
    return ModelOutputShape::Simplified;
  }

  warn!(
    "模型布局无法识别（输出个数: {}），按标准布局兼容解析",
    channel_depths.len()
  );
  ModelOutputShape::Unknown
}

/// 模型输入像素空间内的候选框（已减去补边）
#[derive(Clone, Debug)]
struct Candidate {
  bbox: [f32; 4], // x1, y1, x2, y2
  score: f32,
  class_id: i32,
}

/// 把原始输出张量解码成有界、按置信度降序、互不重叠的检测列表
///
/// 输入张量按标准布局解析（每候选 85 个浮点）；候选先按
/// 物体置信度 × 最高类别分数过滤，再做同类别 NMS，最后
/// 反信箱化变换回原图像素坐标并截断到 128 条。
pub fn post_process(
  output: &[f32],
  geometry: &ModelGeometry,
  letterbox: &LetterboxGeometry,
  conf_threshold: f32,
  nms_threshold: f32,
) -> Vec<Detection> {
  let mut candidates = extract_candidates(output, geometry, letterbox, conf_threshold);

  // 稳定排序，同分保持输入顺序
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
  let candidates = nms(candidates, nms_threshold);

  candidates
    .into_iter()
    .take(MAX_DETECTIONS)
    .map(|c| Detection {
      rect: BoxRect {
        left: (c.bbox[0] / letterbox.scale) as i32,
        top: (c.bbox[1] / letterbox.scale) as i32,
        right: (c.bbox[2] / letterbox.scale) as i32,
        bottom: (c.bbox[3] / letterbox.scale) as i32,
      },
      score: c.score,
      class_id: c.class_id,
      name: coco_cls_to_name(c.class_id).to_string(),
    })
    .collect()
}

/// 按标准布局逐候选抽取：物体置信度过滤、类别取最大、框解码
fn extract_candidates(
  output: &[f32],
  geometry: &ModelGeometry,
  letterbox: &LetterboxGeometry,
  conf_threshold: f32,
) -> Vec<Candidate> {
  let model_width = geometry.width as f32;
  let model_height = geometry.height as f32;
  let rows = output.len() / ROW_CHANNELS;

  let mut candidates = Vec::new();
  for i in 0..rows {
    let row = &output[i * ROW_CHANNELS..(i + 1) * ROW_CHANNELS];

    let objectness = row[4];
    if objectness < conf_threshold {
      continue;
    }

    // 最高类别分数
    let mut max_class_score = 0.0f32;
    let mut class_id = 0usize;
    for (j, &class_score) in row[5..].iter().enumerate() {
      if class_score > max_class_score {
        max_class_score = class_score;
        class_id = j;
      }
    }

    let score = objectness * max_class_score;
    if score < conf_threshold {
      continue;
    }

    // 框以模型输入归一化的 cx/cy/w/h 给出，转成模型像素空间
    // 的角点坐标后减去补边
    let cx = row[0];
    let cy = row[1];
    let width = row[2];
    let height = row[3];

    candidates.push(Candidate {
      bbox: [
        (cx - width / 2.0) * model_width - letterbox.x_pad,
        (cy - height / 2.0) * model_height - letterbox.y_pad,
        (cx + width / 2.0) * model_width - letterbox.x_pad,
        (cy + height / 2.0) * model_height - letterbox.y_pad,
      ],
      score,
      class_id: class_id as i32,
    })
  }

  candidates
}

/// 非极大值抑制
///
/// 候选必须已按置信度降序排列；同类别两两比较，IoU 超过阈值
/// 时压制排序靠后的那个。候选数量每帧至多几百，O(n²) 可接受。
fn nms(candidates: Vec<Candidate>, nms_threshold: f32) -> Vec<Candidate> {
  let mut suppressed = vec![false; candidates.len()];

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    for j in (i + 1)..candidates.len() {
      if suppressed[j] || candidates[i].class_id != candidates[j].class_id {
        continue;
      }
      if iou(&candidates[i].bbox, &candidates[j].bbox) > nms_threshold {
        suppressed[j] = true;
      }
    }
  }

  candidates
    .into_iter()
    .zip(suppressed)
    .filter_map(|(c, s)| (!s).then_some(c))
    .collect()
}

/// 两个边界框的交并比，退化框（零面积）视为 0，避免除零
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  const GEOMETRY: ModelGeometry = ModelGeometry {
    width: 640,
    height: 640,
    channel: 3,
  };

  /// 构造一行标准布局输出，框以模型像素空间的角点坐标给出
  fn make_row(x1: f32, y1: f32, x2: f32, y2: f32, objectness: f32, class_id: usize, class_score: f32) -> Vec<f32> {
    let mut row = vec![0.0f32; 85];
    row[0] = (x1 + x2) / 2.0 / 640.0;
    row[1] = (y1 + y2) / 2.0 / 640.0;
    row[2] = (x2 - x1) / 640.0;
    row[3] = (y2 - y1) / 640.0;
    row[4] = objectness;
    row[5 + class_id] = class_score;
    row
  }

  fn candidate(bbox: [f32; 4], score: f32, class_id: i32) -> Candidate {
    Candidate {
      bbox,
      score,
      class_id,
    }
  }

  #[test]
  fn classify_standard() {
    assert_eq!(classify_output_shape(&[85, 85, 85]), ModelOutputShape::Standard);
  }

  #[test]
  fn classify_simplified() {
    assert_eq!(
      classify_output_shape(&[64, 80, 1, 64, 80, 1, 64, 80, 1]),
      ModelOutputShape::Simplified
    );
  }

  #[test]
  fn classify_unknown() {
    assert_eq!(classify_output_shape(&[85, 85]), ModelOutputShape::Unknown);
    assert_eq!(classify_output_shape(&[84, 84, 84]), ModelOutputShape::Unknown);
    assert_eq!(
      classify_output_shape(&[64, 80, 1, 64, 80, 1, 64, 80, 2]),
      ModelOutputShape::Unknown
    );
  }

  #[test]
  fn iou_identical_boxes() {
    let b = [10.0, 10.0, 50.0, 50.0];
    assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_disjoint_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let b = [100.0, 100.0, 110.0, 110.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn iou_degenerate_boxes() {
    let a = [10.0, 10.0, 10.0, 10.0];
    let b = [10.0, 10.0, 10.0, 10.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn nms_suppresses_contained_box() {
    let big = candidate([0.0, 0.0, 100.0, 100.0], 0.9, 3);
    let small = candidate([40.0, 40.0, 60.0, 60.0], 0.5, 3);
    // 小框完全被大框包含，IoU = 400/10000 = 0.04
    let kept = nms(vec![big, small], 0.03);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].score - 0.9).abs() < 1e-6);
  }

  #[test]
  fn nms_keeps_different_classes() {
    let a = candidate([0.0, 0.0, 100.0, 100.0], 0.9, 0);
    let b = candidate([0.0, 0.0, 100.0, 100.0], 0.5, 1);
    assert_eq!(nms(vec![a, b], 0.45).len(), 2);
  }

  #[test]
  fn nms_is_idempotent() {
    let input = vec![
      candidate([0.0, 0.0, 100.0, 100.0], 0.9, 0),
      candidate([10.0, 10.0, 110.0, 110.0], 0.8, 0),
      candidate([300.0, 300.0, 400.0, 400.0], 0.7, 0),
      candidate([305.0, 305.0, 405.0, 405.0], 0.6, 2),
    ];
    let once = nms(input, 0.45);
    let twice = nms(once.clone(), 0.45);
    assert_eq!(once.len(), twice.len());
    for (a, b) in once.iter().zip(twice.iter()) {
      assert_eq!(a.bbox, b.bbox);
      assert_eq!(a.class_id, b.class_id);
    }
  }

  #[test]
  fn threshold_boundary_is_inclusive() {
    let letterbox = LetterboxGeometry::default();
    // 综合分数恰好等于阈值: 0.5 × 1.0 = 0.5
    let at = make_row(100.0, 100.0, 200.0, 200.0, 0.5, 0, 1.0);
    let kept = post_process(&at, &GEOMETRY, &letterbox, 0.5, 0.45);
    assert_eq!(kept.len(), 1);

    // 略低于阈值: 0.5 × 0.99 = 0.495
    let below = make_row(100.0, 100.0, 200.0, 200.0, 0.5, 0, 0.99);
    let dropped = post_process(&below, &GEOMETRY, &letterbox, 0.5, 0.45);
    assert!(dropped.is_empty());
  }

  #[test]
  fn combined_score_used_not_objectness() {
    let letterbox = LetterboxGeometry::default();
    // 物体置信度过阈值但综合分数不足
    let row = make_row(100.0, 100.0, 200.0, 200.0, 0.9, 0, 0.1);
    assert!(post_process(&row, &GEOMETRY, &letterbox, 0.25, 0.45).is_empty());
  }

  #[test]
  fn letterbox_round_trip() {
    // 1280x720 原图缩放进 640x640: scale = 0.5, 上下各补 140
    let letterbox = LetterboxGeometry {
      scale: 0.5,
      x_pad: 0.0,
      y_pad: 140.0,
    };
    // 原图 (100,100)-(200,200) 在模型空间是 (50,190)-(100,240)
    let row = make_row(50.0, 190.0, 100.0, 240.0, 0.9, 0, 1.0);
    let result = post_process(&row, &GEOMETRY, &letterbox, 0.25, 0.45);
    assert_eq!(result.len(), 1);
    assert_eq!(
      result[0].rect,
      BoxRect {
        left: 100,
        top: 100,
        right: 200,
        bottom: 200
      }
    );
  }

  #[test]
  fn result_sorted_by_score_descending() {
    let letterbox = LetterboxGeometry::default();
    let mut output = Vec::new();
    output.extend(make_row(0.0, 0.0, 20.0, 20.0, 0.5, 0, 1.0));
    output.extend(make_row(100.0, 100.0, 120.0, 120.0, 0.9, 1, 1.0));
    output.extend(make_row(300.0, 300.0, 320.0, 320.0, 0.7, 2, 1.0));
    let result = post_process(&output, &GEOMETRY, &letterbox, 0.25, 0.45);
    assert_eq!(result.len(), 3);
    assert!(result[0].score >= result[1].score);
    assert!(result[1].score >= result[2].score);
    assert_eq!(result[0].class_id, 1);
  }

  #[test]
  fn results_capped_at_max_detections() {
    let letterbox = LetterboxGeometry::default();
    let mut output = Vec::new();
    // 200 个互不重叠的小框
    for i in 0..200usize {
      let x = (i % 25) as f32 * 25.0;
      let y = (i / 25) as f32 * 25.0;
      output.extend(make_row(x, y, x + 20.0, y + 20.0, 0.9, i % 80, 1.0));
    }
    let result = post_process(&output, &GEOMETRY, &letterbox, 0.25, 0.45);
    assert_eq!(result.len(), MAX_DETECTIONS);
  }

  #[test]
  fn unknown_class_resolves_to_unknown_name() {
    let letterbox = LetterboxGeometry::default();
    // 没有任何类别分数超过 0 时落在类别 0，这里直接检查名字解析
    let row = make_row(100.0, 100.0, 200.0, 200.0, 0.9, 79, 1.0);
    let result = post_process(&row, &GEOMETRY, &letterbox, 0.25, 0.45);
    assert_eq!(result[0].name, "toothbrush");
  }
}

// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/publisher/format.rs - 消息格式化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde_json::json;

use crate::detect::{Detection, DetectionBatch};
use crate::publisher::MessageFormatter;

/// JSON 格式化器
///
/// `suppress_empty` 打开时先过滤占位/无效条目（score 为 0 或
/// class_id 为 0），`count` 是实际输出的条目数。
pub struct JsonMessageFormatter {
  suppress_empty: bool,
}

impl JsonMessageFormatter {
  pub fn new(suppress_empty: bool) -> Self {
    Self { suppress_empty }
  }

  fn is_emitted(&self, detection: &Detection) -> bool {
    !self.suppress_empty || (detection.score != 0.0 && detection.class_id != 0)
  }
}

impl MessageFormatter for JsonMessageFormatter {
  fn format_message(&self, batch: &DetectionBatch) -> String {
    let results: Vec<_> = batch
      .detections()
      .iter()
      .filter(|d| self.is_emitted(d))
      .map(|d| {
        json!({
          "box": {
            "left": d.rect.left,
            "top": d.rect.top,
            "right": d.rect.right,
            "bottom": d.rect.bottom,
          },
          "score": d.score,
          "class_id": d.class_id,
          "name": d.name,
        })
      })
      .collect();

    json!({
      "timestamp": batch.timestamp.timestamp(),
      "object_detect_result_list": {
        "count": results.len(),
        "results": results,
      },
    })
    .to_string()
  }
}

/// 紧凑键值对格式化器
///
/// 单行 `key:value` 对，以 `!!` 连接，
/// 例如 `detection_count:2!!timestamp:1746732409`。
pub struct KvMessageFormatter;

impl MessageFormatter for KvMessageFormatter {
  fn format_message(&self, batch: &DetectionBatch) -> String {
    format!(
      "detection_count:{}!!timestamp:{}",
      batch.count(),
      batch.timestamp.timestamp()
    )
  }
}

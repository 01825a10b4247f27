// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/source/mod.rs - 帧来源模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod image_file;
#[cfg(feature = "v4l2_input")]
mod v4l2;

use std::path::Path;

use anyhow::Result;
use image::RgbImage;

pub use image_file::ImageSource;
#[cfg(feature = "v4l2_input")]
pub use v4l2::V4l2Source;

/// 帧数据
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

/// 帧来源类型，决定流水线的运行模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
  /// 静态图片，单次模式
  Image,
  /// V4L2 摄像头，连续模式
  V4l2,
}

/// 帧来源 trait
///
/// 读取以迭代器形式暴露：`Some(Err(_))` 是瞬时读取失败，
/// `None` 表示设备/来源已经耗尽。
pub trait FrameSource: Iterator<Item = Result<Frame>> {
  fn kind(&self) -> SourceKind;
  fn width(&self) -> u32;
  fn height(&self) -> u32;
}

/// 判断来源标识对应的来源类型
///
/// `/dev/video*` 或 `v4l2://` 前缀是摄像头设备，存在的常规
/// 文件是静态图片，其余无法解析。
pub fn resolve_source_kind(source: &str) -> Option<SourceKind> {
  if source.starts_with("/dev/video") || source.starts_with("v4l2://") {
    return Some(SourceKind::V4l2);
  }
  if Path::new(source).is_file() {
    return Some(SourceKind::Image);
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_device_paths() {
    assert_eq!(resolve_source_kind("/dev/video0"), Some(SourceKind::V4l2));
    assert_eq!(resolve_source_kind("v4l2:///dev/video1"), Some(SourceKind::V4l2));
  }

  #[test]
  fn resolve_missing_path() {
    assert_eq!(resolve_source_kind("/nonexistent/frame.jpg"), None);
  }
}

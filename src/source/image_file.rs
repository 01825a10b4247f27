// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/source/image_file.rs - 图片帧来源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::{Context, Result};
use image::{ImageReader, RgbImage};

use super::{Frame, FrameSource, SourceKind};

/// 图片帧来源，只产出一帧
pub struct ImageSource {
  image: Option<RgbImage>,
  width: u32,
  height: u32,
}

impl ImageSource {
  pub fn new(path: &str) -> Result<Self> {
    let image = ImageReader::open(path)
      .with_context(|| format!("无法打开图片文件: {}", path))?
      .decode()
      .with_context(|| format!("无法解码图片文件: {}", path))?
      .to_rgb8();

    let width = image.width();
    let height = image.height();

    Ok(Self {
      image: Some(image),
      width,
      height,
    })
  }
}

impl Iterator for ImageSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| {
      Ok(Frame {
        image,
        index: 0,
        timestamp_ms: 0,
      })
    })
  }
}

impl FrameSource for ImageSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Image
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }
}

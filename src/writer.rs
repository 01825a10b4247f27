// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/writer.rs - 标注帧写出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, error, warn};

use crate::detect::{Detection, DetectionBatch};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const PLACEHOLDER_COLOR: [u8; 3] = [255, 0, 0];
const BOX_THICKNESS: i32 = 2;
const LABEL_BAR_HEIGHT: u32 = 12;

/// 标注帧写出器
///
/// 把检测框画到帧上并持久化为图像文件。写出失败只记录日志，
/// 从不向流水线传播。
pub struct DecoratedFrameWriter {
  output_path: PathBuf,
  suppress_empty: bool,
}

impl DecoratedFrameWriter {
  pub fn new(output_path: impl Into<PathBuf>, suppress_empty: bool) -> Self {
    Self {
      output_path: output_path.into(),
      suppress_empty,
    }
  }

  /// 绘制并写出一帧，内部错误吞掉只记日志
  pub fn write_frame(&self, image: &RgbImage, batch: &DetectionBatch) {
    let mut canvas = image.clone();
    self.draw_batch(&mut canvas, batch);

    if let Err(e) = self.save_atomic(&canvas) {
      error!("标注帧写出失败: {}", e);
    }
  }

  fn draw_batch(&self, canvas: &mut RgbImage, batch: &DetectionBatch) {
    let valid = batch
      .detections()
      .iter()
      .filter(|d| d.is_valid_in(canvas.width(), canvas.height()))
      .count();

    if self.suppress_empty && valid == 0 {
      draw_placeholder(canvas);
      return;
    }

    for detection in batch.detections() {
      if !detection.is_valid_in(canvas.width(), canvas.height()) {
        warn!(
          "跳过无效检测: score={:.2}, class_id={}, box=[{},{},{},{}]",
          detection.score,
          detection.class_id,
          detection.rect.left,
          detection.rect.top,
          detection.rect.right,
          detection.rect.bottom
        );
        continue;
      }
      draw_detection(canvas, detection);
    }
  }

  /// 先写临时文件再原子重命名，读取方永远看不到残缺的文件
  ///
  /// 临时路径保留扩展名，图像编码器按扩展名选择格式。
  fn save_atomic(&self, canvas: &RgbImage) -> anyhow::Result<()> {
    let temp_path = temp_path_for(&self.output_path);
    canvas.save(&temp_path)?;
    if let Err(e) = std::fs::rename(&temp_path, &self.output_path) {
      let _ = std::fs::remove_file(&temp_path);
      return Err(e.into());
    }
    debug!("标注帧已写出: {}", self.output_path.display());
    Ok(())
  }
}

fn temp_path_for(path: &Path) -> PathBuf {
  match (path.file_stem(), path.extension()) {
    (Some(stem), Some(ext)) => path.with_file_name(format!(
      "{}.tmp.{}",
      stem.to_string_lossy(),
      ext.to_string_lossy()
    )),
    // 没有扩展名时默认 jpg
    _ => {
      let mut name = path.as_os_str().to_owned();
      name.push(".tmp.jpg");
      PathBuf::from(name)
    }
  }
}

/// 画 2 像素宽的边框加顶部标签条
fn draw_detection(canvas: &mut RgbImage, detection: &Detection) {
  let rect = &detection.rect;
  let (width, height) = (canvas.width() as i32, canvas.height() as i32);

  for thickness in 0..BOX_THICKNESS {
    let left = (rect.left + thickness).min(width - 1);
    let top = (rect.top + thickness).min(height - 1);
    let right = (rect.right - thickness).max(0);
    let bottom = (rect.bottom - thickness).max(0);

    for x in left..=right {
      canvas.put_pixel(x as u32, top as u32, Rgb(BOX_COLOR));
      canvas.put_pixel(x as u32, bottom as u32, Rgb(BOX_COLOR));
    }
    for y in top..=bottom {
      canvas.put_pixel(left as u32, y as u32, Rgb(BOX_COLOR));
      canvas.put_pixel(right as u32, y as u32, Rgb(BOX_COLOR));
    }
  }

  // 框上方的标签条
  let bar_y = (rect.top - LABEL_BAR_HEIGHT as i32).max(0);
  let bar_width = (rect.right - rect.left).max(1) as u32;
  let bar = Rect::at(rect.left, bar_y).of_size(bar_width.min((width - rect.left) as u32), LABEL_BAR_HEIGHT);
  draw_filled_rect_mut(canvas, bar, Rgb(BOX_COLOR));
}

/// suppress_empty 且无有效检测时画居中的红色占位标记
fn draw_placeholder(canvas: &mut RgbImage) {
  let width = canvas.width();
  let height = canvas.height();
  let marker_w = (width / 4).max(1);
  let marker_h = (height / 16).max(1);
  let marker = Rect::at(
    ((width - marker_w) / 2) as i32,
    ((height - marker_h) / 2) as i32,
  )
  .of_size(marker_w, marker_h);
  draw_filled_rect_mut(canvas, marker, Rgb(PLACEHOLDER_COLOR));
}

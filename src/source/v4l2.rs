// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/source/v4l2.rs - V4L2 摄像头帧来源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::pin::Pin;
use std::time::Instant;

use anyhow::{Context, Result};
use image::RgbImage;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use tracing::info;

use super::{Frame, FrameSource, SourceKind};

/// 摄像头请求的采集分辨率，与模型输入一致
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 640;

/// V4L2 摄像头帧来源
///
/// v4l 的 Stream 持有对 Device 的引用，这里用 Pin<Box> 固定
/// Device 的内存地址，使引用它的 Stream 可以安全存在同一结构体中。
pub struct V4l2Source {
  /// V4L2 设备（Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl V4l2Source {
  pub fn new(source: &str) -> Result<Self> {
    let device_path = source.trim_start_matches("v4l2://");

    let device = Box::pin(
      Device::with_path(device_path).with_context(|| format!("无法打开设备: {}", device_path))?,
    );

    let mut format = device.format()?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    info!(
      "摄像头已打开: {} {}x{}",
      device_path, format.width, format.height
    );

    let width = format.width;
    let height = format.height;

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width,
      height,
      start_time: Instant::now(),
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动；stream 存储
    // 在同一结构体中，Drop 时先经由 Option::take 释放 stream，
    // 再释放 device，引用始终有效。
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4).context("无法创建捕获流")?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  /// YUYV 转 RGB
  fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);

    for chunk in yuyv.chunks(4) {
      if chunk.len() < 4 {
        break;
      }

      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb_data = Self::yuyv_to_rgb(buffer);

        let image = match RgbImage::from_raw(self.width, self.height, rgb_data) {
          Some(image) => image,
          None => {
            return Some(Err(anyhow::anyhow!("无法创建 RGB 图像")));
          }
        };

        let frame = Frame {
          image,
          index: self.frame_index,
          timestamp_ms: self.start_time.elapsed().as_millis() as u64,
        };

        self.frame_index += 1;
        Some(Ok(frame))
      }
      Err(e) => Some(Err(anyhow::anyhow!("无法捕获帧: {}", e))),
    }
  }
}

impl FrameSource for V4l2Source {
  fn kind(&self) -> SourceKind {
    SourceKind::V4l2
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }
}

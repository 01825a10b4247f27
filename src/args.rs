// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::{Parser, ValueEnum};

/// 结果消息的序列化格式
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatterKind {
  /// JSON 结果文档
  Json,
  /// `key:value!!key:value` 紧凑键值对
  Kv,
}

/// Saibei 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(value_name = "MODEL")]
  pub model: String,

  /// 输入来源（图片文件或 V4L2 设备路径）
  /// 支持格式:
  /// - 图片: *.jpg, *.jpeg, *.png, *.bmp, *.webp
  /// - V4L2: /dev/video0 或 v4l2:///dev/video0
  #[arg(value_name = "SOURCE")]
  pub source: String,

  /// 结果发布目标 URL（udp://host:port 或 file:///path）
  #[arg(long, default_value = "file:///tmp/results.json", value_name = "URL")]
  pub output: String,

  /// 标注帧输出路径
  #[arg(long, default_value = "/tmp/output.jpg", value_name = "FILE")]
  pub frame_output: String,

  /// 消息格式
  #[arg(long, value_enum, default_value_t = FormatterKind::Json)]
  pub formatter: FormatterKind,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 采集目标帧率
  #[arg(long, default_value = "30", value_name = "FPS")]
  pub fps: u32,

  /// 发布目标速率（每秒消息数）
  #[arg(long, default_value = "1", value_name = "MPS")]
  pub mps: u32,

  /// 结果通道最大深度，溢出时丢弃最旧结果
  #[arg(long, default_value = "1", value_name = "DEPTH")]
  pub queue_depth: usize,

  /// 过滤无效检测，且无检测时输出占位标注帧
  #[arg(long)]
  pub suppress_empty: bool,
}

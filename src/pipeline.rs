// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/pipeline.rs - 捕获/推理流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::channel::ResultChannel;
use crate::detect::{DetectionBatch, post_process};
use crate::detector::Detector;
use crate::source::{ImageSource, SourceKind, resolve_source_kind};
use crate::writer::DecoratedFrameWriter;

/// 瞬时读取失败后的重试间隔
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// 捕获/推理流水线
///
/// 驱动帧获取、调用检测器与解码器、把结果推入通道，并可选地
/// 把标注帧交给写出器。检测器上下文由流水线独占，从构造持有
/// 到流水线退出。
pub struct InferencePipeline<D: Detector> {
  detector: D,
  channel: ResultChannel<DetectionBatch>,
  running: Arc<AtomicBool>,
  conf_threshold: f32,
  nms_threshold: f32,
  target_fps: u32,
  writer: Option<Arc<DecoratedFrameWriter>>,
}

impl<D: Detector> InferencePipeline<D> {
  pub fn new(
    detector: D,
    channel: ResultChannel<DetectionBatch>,
    running: Arc<AtomicBool>,
    conf_threshold: f32,
    nms_threshold: f32,
    target_fps: u32,
  ) -> Self {
    Self {
      detector,
      channel,
      running,
      conf_threshold,
      nms_threshold,
      target_fps: target_fps.max(1),
      writer: None,
    }
  }

  pub fn with_writer(mut self, writer: Arc<DecoratedFrameWriter>) -> Self {
    self.writer = Some(writer);
    self
  }

  /// 按来源类型运行到结束
  ///
  /// 静态图片走单次模式，摄像头设备走连续模式。无论哪条路径
  /// 退出，都翻转运行标志并向通道发出关闭信号，让发布线程
  /// 排空后解除阻塞。
  pub fn run(&mut self, source: &str) -> Result<()> {
    let result = match resolve_source_kind(source) {
      Some(SourceKind::Image) => self.run_single(source),
      Some(SourceKind::V4l2) => self.run_continuous(source),
      None => Err(anyhow::anyhow!("无法解析来源: {}", source)),
    };

    if let Err(e) = &result {
      error!("推理流水线错误: {}", e);
    }

    self.running.store(false, Ordering::SeqCst);
    self.channel.signal_shutdown();
    info!("推理流水线退出");
    result
  }

  /// 单次模式：处理一张静态图片后返回
  fn run_single(&mut self, path: &str) -> Result<()> {
    info!("单次模式，图片: {}", path);
    let mut source = ImageSource::new(path)?;
    let frame = source
      .next()
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;

    let batch = match self.infer_frame(&frame.image) {
      Ok(batch) => batch,
      Err(e) => {
        warn!("推理失败，按空结果处理: {}", e);
        DetectionBatch::empty(Utc::now())
      }
    };
    self.channel.push(batch.clone());
    if let Some(writer) = &self.writer {
      writer.write_frame(&frame.image, &batch);
    }

    info!("单次推理完成，检测到 {} 个目标", batch.count());
    Ok(())
  }

  /// 连续模式：以目标帧率循环采集与推理
  #[cfg(feature = "v4l2_input")]
  fn run_continuous(&mut self, device: &str) -> Result<()> {
    use crate::source::V4l2Source;

    info!("连续模式，设备: {}", device);
    let mut source = V4l2Source::new(device)?;

    let frame_interval = Duration::from_millis(1000 / self.target_fps as u64);
    while self.running.load(Ordering::SeqCst) {
      let frame_start = Instant::now();

      let frame = match source.next() {
        None => {
          warn!("捕获流已结束，退出循环");
          break;
        }
        Some(Err(e)) => {
          // 单帧读取失败是唯一重试的失败类别
          warn!("读取帧失败: {}，{:?} 后重试", e, RETRY_DELAY);
          std::thread::sleep(RETRY_DELAY);
          continue;
        }
        Some(Ok(frame)) => frame,
      };
      debug!("处理第 {} 帧 ({}ms)", frame.index, frame.timestamp_ms);

      // 推理前独立复制一帧，标注侧永远不会观察到半处理状态
      let annotate_copy = frame.image.clone();

      let (batch, infer_failed) = match self.infer_frame(&frame.image) {
        Ok(batch) => (batch, false),
        Err(e) => {
          warn!("推理失败，按空结果处理: {}", e);
          (DetectionBatch::empty(Utc::now()), true)
        }
      };
      self.channel.push(batch.clone());
      if let Some(writer) = &self.writer {
        writer.write_frame(&annotate_copy, &batch);
      }

      if infer_failed {
        std::thread::sleep(RETRY_DELAY);
        continue;
      }

      // 固定速率节流，不做漂移补偿
      let elapsed = frame_start.elapsed();
      if frame_interval > elapsed {
        std::thread::sleep(frame_interval - elapsed);
      }
    }

    Ok(())
  }

  #[cfg(not(feature = "v4l2_input"))]
  fn run_continuous(&mut self, _device: &str) -> Result<()> {
    anyhow::bail!("编译时未启用 v4l2_input 特性，无法使用摄像头来源")
  }

  /// 对一帧执行检测器与解码器
  ///
  /// 检测器失败不是致命错误，由调用方决定退避策略，该帧
  /// 按空结果处理，单个坏帧不会终止流水线。
  fn infer_frame(
    &mut self,
    image: &RgbImage,
  ) -> Result<DetectionBatch, crate::detector::DetectorError> {
    let raw = self.detector.infer(image)?;

    let Some(output) = raw.tensors.first() else {
      warn!("检测器没有输出张量，按空结果处理");
      return Ok(DetectionBatch::empty(Utc::now()));
    };

    let geometry = self.detector.geometry();
    let detections = post_process(
      output,
      &geometry,
      &raw.letterbox,
      self.conf_threshold,
      self.nms_threshold,
    );
    debug!("解码得到 {} 个检测", detections.len());

    Ok(DetectionBatch::new(detections, Utc::now()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detect::{LetterboxGeometry, ModelGeometry, ModelOutputShape};
  use crate::detector::{DetectorError, RawOutput};

  struct StubDetector {
    output: Vec<f32>,
  }

  impl Detector for StubDetector {
    fn infer(&mut self, _image: &RgbImage) -> Result<RawOutput, DetectorError> {
      Ok(RawOutput {
        tensors: vec![self.output.clone()],
        letterbox: LetterboxGeometry::default(),
      })
    }

    fn geometry(&self) -> ModelGeometry {
      ModelGeometry {
        width: 640,
        height: 640,
        channel: 3,
      }
    }

    fn output_shape(&self) -> ModelOutputShape {
      ModelOutputShape::Standard
    }
  }

  struct FailingDetector;

  impl Detector for FailingDetector {
    fn infer(&mut self, _image: &RgbImage) -> Result<RawOutput, DetectorError> {
      Err(DetectorError::Inference("模拟故障".to_string()))
    }

    fn geometry(&self) -> ModelGeometry {
      ModelGeometry {
        width: 640,
        height: 640,
        channel: 3,
      }
    }

    fn output_shape(&self) -> ModelOutputShape {
      ModelOutputShape::Unknown
    }
  }

  fn pipeline<D: Detector>(detector: D) -> (InferencePipeline<D>, ResultChannel<DetectionBatch>, Arc<AtomicBool>) {
    let channel = ResultChannel::new(1);
    let running = Arc::new(AtomicBool::new(true));
    let pipeline = InferencePipeline::new(
      detector,
      channel.clone(),
      running.clone(),
      0.25,
      0.45,
      30,
    );
    (pipeline, channel, running)
  }

  #[test]
  fn missing_source_flips_running_without_enqueue() {
    let (mut pipeline, channel, running) = pipeline(StubDetector { output: Vec::new() });
    assert!(pipeline.run("/nonexistent/input.jpg").is_err());
    assert!(!running.load(Ordering::SeqCst));
    assert!(channel.is_shutdown());
    assert_eq!(channel.pop().map(|b| b.count()), None);
  }

  #[test]
  fn detector_failure_surfaces_error() {
    let (mut pipeline, _, _) = pipeline(FailingDetector);
    let image = RgbImage::new(640, 640);
    assert!(pipeline.infer_frame(&image).is_err());
  }

  #[test]
  fn detector_failure_single_shot_pushes_empty_batch() {
    let dir = std::env::temp_dir().join("saibei-pipeline-failing");
    std::fs::create_dir_all(&dir).unwrap();
    let image_path = dir.join("input.png");
    RgbImage::new(64, 64).save(&image_path).unwrap();

    let (mut pipeline, channel, _) = pipeline(FailingDetector);
    pipeline.run(image_path.to_str().unwrap()).unwrap();

    let batch = channel.pop().expect("失败帧也应产生一批空结果");
    assert!(batch.is_empty());

    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn detector_without_tensors_yields_empty_batch() {
    struct NoOutputDetector;
    impl Detector for NoOutputDetector {
      fn infer(&mut self, _image: &RgbImage) -> Result<RawOutput, DetectorError> {
        Ok(RawOutput {
          tensors: Vec::new(),
          letterbox: LetterboxGeometry::default(),
        })
      }
      fn geometry(&self) -> ModelGeometry {
        ModelGeometry {
          width: 640,
          height: 640,
          channel: 3,
        }
      }
      fn output_shape(&self) -> ModelOutputShape {
        ModelOutputShape::Standard
      }
    }

    let (mut pipeline, _, _) = pipeline(NoOutputDetector);
    let batch = pipeline.infer_frame(&RgbImage::new(640, 640)).unwrap();
    assert!(batch.is_empty());
  }
}

// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use saibei::channel::ResultChannel;
use saibei::detector::{Detector, OnnxDetector};
use saibei::pipeline::InferencePipeline;
use saibei::publisher::{
  JsonMessageFormatter, KvMessageFormatter, MessageFormatter, Publisher, create_transport,
};
use saibei::source::resolve_source_kind;
use saibei::writer::DecoratedFrameWriter;

use args::{Args, FormatterKind};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = Args::parse();

  info!("Saibei 检测结果服务");
  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.source);
  info!("发布目标: {}", args.output);

  // 来源与模型解析失败直接退出，不进入工作线程
  if resolve_source_kind(&args.source).is_none() {
    error!("无法解析来源: {}", args.source);
    std::process::exit(-1);
  }
  let detector = match OnnxDetector::new(&args.model) {
    Ok(detector) => detector,
    Err(e) => {
      error!("模型加载失败: {}", e);
      std::process::exit(-1);
    }
  };
  info!("模型加载完成，输出形状: {:?}", detector.output_shape());

  let running = Arc::new(AtomicBool::new(true));
  let channel = ResultChannel::new(args.queue_depth.max(1));

  let transport = match Url::parse(&args.output).map_err(anyhow::Error::from).and_then(|url| {
    create_transport(&url).map_err(anyhow::Error::from)
  }) {
    Ok(transport) => transport,
    Err(e) => {
      error!("发布目标无效 {}: {}", args.output, e);
      std::process::exit(-1);
    }
  };
  let formatter: Arc<dyn MessageFormatter> = match args.formatter {
    FormatterKind::Json => Arc::new(JsonMessageFormatter::new(args.suppress_empty)),
    FormatterKind::Kv => Arc::new(KvMessageFormatter),
  };
  let publisher = Publisher::new(transport, formatter, channel.clone(), args.mps);

  let writer = Arc::new(DecoratedFrameWriter::new(
    &args.frame_output,
    args.suppress_empty,
  ));
  let mut pipeline = InferencePipeline::new(
    detector,
    channel.clone(),
    running.clone(),
    args.confidence,
    args.nms_threshold,
    args.fps,
  )
  .with_writer(writer);

  {
    let running = running.clone();
    let channel = channel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      running.store(false, Ordering::SeqCst);
      channel.signal_shutdown();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .expect("Error setting Ctrl-C handler");
  }

  let source = args.source.clone();
  let pipeline_thread = thread::spawn(move || {
    if let Err(e) = pipeline.run(&source) {
      error!("流水线线程退出: {}", e);
    }
  });
  let publisher_thread = thread::spawn(move || {
    publisher.run();
  });

  if pipeline_thread.join().is_err() {
    error!("流水线线程异常终止");
  }
  if publisher_thread.join().is_err() {
    error!("发布线程异常终止");
  }

  info!("任务完成，退出");
  Ok(())
}

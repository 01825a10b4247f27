// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/publisher/mod.rs - 结果发布流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub mod format;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channel::ResultChannel;
use crate::detect::DetectionBatch;

pub use format::{JsonMessageFormatter, KvMessageFormatter};
pub use transport::{FileTransport, Transport, UdpTransport, create_transport};

/// 消息格式化策略
pub trait MessageFormatter: Send + Sync {
  fn format_message(&self, batch: &DetectionBatch) -> String;
}

/// 结果发布流水线
///
/// 从通道取结果，按配置的格式化器序列化后经传输层投递，
/// 以固定速率节流。传输层断开或发送失败时该条结果直接放弃：
/// 过期的结果不值得重投（与通道的弃旧策略一致）。
pub struct Publisher {
  transport: Arc<dyn Transport>,
  formatter: Arc<dyn MessageFormatter>,
  channel: ResultChannel<DetectionBatch>,
  target_mps: u32,
}

impl Publisher {
  pub fn new(
    transport: Arc<dyn Transport>,
    formatter: Arc<dyn MessageFormatter>,
    channel: ResultChannel<DetectionBatch>,
    messages_per_second: u32,
  ) -> Self {
    Self {
      transport,
      formatter,
      channel,
      target_mps: messages_per_second.max(1),
    }
  }

  /// 发布循环，通道关闭并排空后返回
  pub fn run(&self) {
    info!("发布线程启动，目标速率 {} 条/秒", self.target_mps);

    while let Some(batch) = self.channel.pop() {
      if !self.transport.is_connected() {
        warn!("传输层未连接，跳过该条结果");
        continue;
      }

      let message = self.formatter.format_message(&batch);
      if self.transport.send(&message) {
        debug!("已发布 {} 条检测结果", batch.count());
      } else {
        error!("传输层发送失败");
      }

      std::thread::sleep(Duration::from_millis(1000 / self.target_mps as u64));
    }

    info!("通道已关闭，发布线程退出");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct MockTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<String>>,
  }

  impl MockTransport {
    fn new(connected: bool) -> Arc<Self> {
      Arc::new(Self {
        connected: AtomicBool::new(connected),
        sent: Mutex::new(Vec::new()),
      })
    }
  }

  impl Transport for MockTransport {
    fn send(&self, data: &str) -> bool {
      self.sent.lock().unwrap().push(data.to_string());
      true
    }

    fn is_connected(&self) -> bool {
      self.connected.load(Ordering::SeqCst)
    }
  }

  #[test]
  fn publishes_until_channel_closes() {
    let channel = ResultChannel::new(2);
    channel.push(DetectionBatch::empty(Utc::now()));
    channel.push(DetectionBatch::empty(Utc::now()));
    channel.signal_shutdown();

    let transport = MockTransport::new(true);
    let publisher = Publisher::new(
      transport.clone(),
      Arc::new(KvMessageFormatter),
      channel,
      1000,
    );
    publisher.run();

    assert_eq!(transport.sent.lock().unwrap().len(), 2);
  }

  #[test]
  fn skips_when_disconnected() {
    let channel = ResultChannel::new(2);
    channel.push(DetectionBatch::empty(Utc::now()));
    channel.signal_shutdown();

    let transport = MockTransport::new(false);
    let publisher = Publisher::new(
      transport.clone(),
      Arc::new(KvMessageFormatter),
      channel,
      1000,
    );
    publisher.run();

    assert!(transport.sent.lock().unwrap().is_empty());
  }
}

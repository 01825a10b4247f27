// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/channel.rs - 有界结果通道
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

/// 推理结果与发布线程之间的有界通道。
///
/// 容量满时丢弃最旧的条目为新条目腾出空间：最新一帧的结果
/// 比完整的结果序列更重要。`pop` 阻塞直到有数据或收到关闭信号。
pub struct ResultChannel<T> {
  inner: Arc<Inner<T>>,
}

struct Inner<T> {
  state: Mutex<State<T>>,
  cond: Condvar,
  max_depth: usize,
}

struct State<T> {
  queue: VecDeque<T>,
  shutdown: bool,
}

impl<T> Clone for ResultChannel<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> ResultChannel<T> {
  /// 创建一个最多保留 `max_depth` 条结果的通道
  ///
  /// `max_depth` 为 0 时按 1 处理。
  pub fn new(max_depth: usize) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          queue: VecDeque::new(),
          shutdown: false,
        }),
        cond: Condvar::new(),
        max_depth: max_depth.max(1),
      }),
    }
  }

  /// 入队一条结果，从不阻塞
  ///
  /// 通道已满时先丢弃最旧的条目。关闭信号之后仍可入队，
  /// 以便生产者完成在途的工作。
  pub fn push(&self, value: T) {
    let mut state = self.inner.state.lock().unwrap();
    if state.queue.len() >= self.inner.max_depth {
      state.queue.pop_front();
      debug!("通道已满，丢弃最旧的结果");
    }
    state.queue.push_back(value);
    self.inner.cond.notify_one();
  }

  /// 阻塞等待下一条结果
  ///
  /// 仅当通道已关闭且排空时返回 `None`；否则按 FIFO 返回
  /// 保留窗口内最旧的条目。
  pub fn pop(&self) -> Option<T> {
    let mut state = self.inner.state.lock().unwrap();
    while state.queue.is_empty() && !state.shutdown {
      state = self.inner.cond.wait(state).unwrap();
    }

    if state.shutdown && state.queue.is_empty() {
      return None;
    }

    state.queue.pop_front()
  }

  /// 发出关闭信号并唤醒所有等待者，可重复调用
  pub fn signal_shutdown(&self) {
    let mut state = self.inner.state.lock().unwrap();
    state.shutdown = true;
    self.inner.cond.notify_all();
  }

  pub fn is_shutdown(&self) -> bool {
    self.inner.state.lock().unwrap().shutdown
  }
}

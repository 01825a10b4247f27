// 该文件是 Saibei （塞北飞雪） 项目的一部分。
// src/publisher/transport.rs - 结果投递传输层
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 投递传输策略
///
/// 不做隐式重试，重试与否是发布侧的策略（当前的策略是放弃，
/// 与“新鲜优先于完整”一致）。
pub trait Transport: Send + Sync {
  /// 投递一条消息，true 表示整条载荷已交给下层
  fn send(&self, data: &str) -> bool;
  /// 传输层是否可用
  fn is_connected(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("URI 方案不支持: {0}")]
  UnsupportedScheme(String),
  #[error("传输地址无效: {0}")]
  InvalidAddress(String),
}

/// UDP 数据报传输
///
/// 无连接；“已连接”仅表示套接字创建成功。发送即发即弃，
/// 成功的标准是整条载荷在一次调用中交给了操作系统。
pub struct UdpTransport {
  socket: Option<UdpSocket>,
  target: String,
}

impl UdpTransport {
  pub fn new(host: &str, port: u16) -> Self {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
      Ok(socket) => Some(socket),
      Err(e) => {
        error!("UDP 套接字创建失败: {}", e);
        None
      }
    };

    Self {
      socket,
      target: format!("{}:{}", host, port),
    }
  }
}

impl Transport for UdpTransport {
  fn send(&self, data: &str) -> bool {
    let Some(socket) = &self.socket else {
      return false;
    };

    match socket.send_to(data.as_bytes(), &self.target) {
      Ok(sent) => sent == data.len(),
      Err(e) => {
        warn!("UDP 发送失败: {}", e);
        false
      }
    }
  }

  fn is_connected(&self) -> bool {
    self.socket.is_some()
  }
}

impl FromUrlWithScheme for UdpTransport {
  const SCHEME: &'static str = "udp";
}

impl FromUrl for UdpTransport {
  type Error = TransportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
    }
    let host = url
      .host_str()
      .ok_or_else(|| TransportError::InvalidAddress(url.to_string()))?;
    let port = url
      .port()
      .ok_or_else(|| TransportError::InvalidAddress(url.to_string()))?;
    Ok(UdpTransport::new(host, port))
  }
}

/// 文件传输
///
/// 先写临时文件再原子重命名覆盖目标路径，读取方永远看不到
/// 写了一半的文件。写入或重命名失败返回 false，之前的文件保持
/// 原样。“已连接”表示目标目录在构造时存在或创建成功。
pub struct FileTransport {
  path: PathBuf,
  enabled: bool,
}

impl FileTransport {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let enabled = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => match std::fs::create_dir_all(parent) {
        Ok(()) => true,
        Err(e) => {
          error!("无法创建目标目录 {}: {}", parent.display(), e);
          false
        }
      },
      _ => true,
    };

    Self { path, enabled }
  }

  fn temp_path(&self) -> PathBuf {
    let mut name = self.path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
  }
}

impl Transport for FileTransport {
  fn send(&self, data: &str) -> bool {
    if !self.enabled {
      return false;
    }

    let temp_path = self.temp_path();
    if let Err(e) = std::fs::write(&temp_path, data) {
      warn!("写入临时文件失败 {}: {}", temp_path.display(), e);
      return false;
    }

    if let Err(e) = std::fs::rename(&temp_path, &self.path) {
      warn!("重命名临时文件失败: {}", e);
      let _ = std::fs::remove_file(&temp_path);
      return false;
    }

    true
  }

  fn is_connected(&self) -> bool {
    self.enabled
  }
}

impl FromUrlWithScheme for FileTransport {
  const SCHEME: &'static str = "file";
}

impl FromUrl for FileTransport {
  type Error = TransportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
    }
    Ok(FileTransport::new(Path::new(url.path())))
  }
}

/// 按 URL 方案创建传输层
pub fn create_transport(url: &Url) -> Result<Arc<dyn Transport>, TransportError> {
  match url.scheme() {
    UdpTransport::SCHEME => {
      let transport = UdpTransport::from_url(url)?;
      info!("使用 UDP 传输: {}", url);
      Ok(Arc::new(transport))
    }
    FileTransport::SCHEME => {
      let transport = FileTransport::from_url(url)?;
      info!("使用文件传输: {}", url);
      Ok(Arc::new(transport))
    }
    scheme => Err(TransportError::UnsupportedScheme(scheme.to_string())),
  }
}

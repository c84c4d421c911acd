// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output.rs - 输出定义
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

use std::{collections::BTreeMap, fmt, sync::mpsc::Sender, time::Duration};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, postprocess::Detection};

#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 模型加载阶段与运行故障的状态通知
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
  LoadingModel(String),
  InitializingEngine,
  InspectingOutput,
  AllocatingBuffers,
  Ready,
  LoadFailed(String),
  FrameDropped(String),
  InferenceFailed(String),
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Status::LoadingModel(path) => write!(f, "读取模型文件: {}", path),
      Status::InitializingEngine => write!(f, "初始化推理引擎..."),
      Status::InspectingOutput => write!(f, "分析模型输出结构..."),
      Status::AllocatingBuffers => write!(f, "分配张量缓冲区..."),
      Status::Ready => write!(f, "模型已就绪"),
      Status::LoadFailed(reason) => write!(f, "模型加载失败: {}", reason),
      Status::FrameDropped(reason) => write!(f, "丢弃帧: {}", reason),
      Status::InferenceFailed(reason) => write!(f, "推理失败: {}", reason),
    }
  }
}

/// 一帧处理结果的值快照，不引用流水线内部状态
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
  pub frame_index: u64,
  /// 旋转后的源帧宽度
  pub width: u32,
  /// 旋转后的源帧高度
  pub height: u32,
  pub detections: Vec<Detection>,
  pub counts: BTreeMap<String, usize>,
  pub inference_time: Duration,
}

impl DetectionReport {
  pub fn new(
    frame_index: u64,
    width: u32,
    height: u32,
    detections: Vec<Detection>,
    inference_time: Duration,
  ) -> Self {
    let counts = count_by_label(&detections);
    Self {
      frame_index,
      width,
      height,
      detections,
      counts,
      inference_time,
    }
  }

  pub fn total(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

/// 按类别名称统计检测数量
pub fn count_by_label(detections: &[Detection]) -> BTreeMap<String, usize> {
  let mut counts = BTreeMap::new();
  for detection in detections {
    *counts.entry(detection.label.clone()).or_insert(0) += 1;
  }
  counts
}

pub trait DetectionSink {
  fn on_detections(&self, report: &DetectionReport);
}

pub trait StatusSink {
  fn on_status(&self, status: &Status);
}

impl<F: Fn(&DetectionReport)> DetectionSink for F {
  fn on_detections(&self, report: &DetectionReport) {
    self(report)
  }
}

impl<F: Fn(&Status)> StatusSink for F {
  fn on_status(&self, status: &Status) {
    self(status)
  }
}

/// 丢弃所有通知
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DetectionSink for NullSink {
  fn on_detections(&self, _report: &DetectionReport) {}
}

impl StatusSink for NullSink {
  fn on_status(&self, _status: &Status) {}
}

/// 通过日志输出检测结果与状态
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DetectionSink for LogSink {
  fn on_detections(&self, report: &DetectionReport) {
    if report.is_empty() {
      debug!("帧 {}: 未检测到物体", report.frame_index);
      return;
    }
    info!(
      "帧 {}: 检测到 {} 个物体 {:?}, 推理耗时 {:.2?}",
      report.frame_index,
      report.total(),
      report.counts,
      report.inference_time
    );
    for d in &report.detections {
      debug!(
        "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}, {:.0})",
        d.label,
        d.confidence * 100.0,
        d.bbox.left,
        d.bbox.top,
        d.bbox.right,
        d.bbox.bottom
      );
    }
  }
}

impl StatusSink for LogSink {
  fn on_status(&self, status: &Status) {
    match status {
      Status::LoadFailed(_) | Status::FrameDropped(_) | Status::InferenceFailed(_) => {
        warn!("{}", status)
      }
      _ => info!("{}", status),
    }
  }
}

/// 把结果投递到通道，由展示线程异步消费
#[derive(Debug, Clone)]
pub struct ChannelSink<T> {
  sender: Sender<T>,
}

impl<T> ChannelSink<T> {
  pub fn new(sender: Sender<T>) -> Self {
    Self { sender }
  }
}

impl DetectionSink for ChannelSink<DetectionReport> {
  fn on_detections(&self, report: &DetectionReport) {
    if self.sender.send(report.clone()).is_err() {
      debug!("结果接收端已关闭, 丢弃帧 {} 的结果", report.frame_index);
    }
  }
}

impl StatusSink for ChannelSink<Status> {
  fn on_status(&self, status: &Status) {
    if self.sender.send(status.clone()).is_err() {
      debug!("状态接收端已关闭: {}", status);
    }
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

const LOG_SCHEME: &str = "log";

pub enum OutputWrapper {
  Log(LogSink),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LOG_SCHEME => Ok(OutputWrapper::Log(LogSink)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DetectionSink for OutputWrapper {
  fn on_detections(&self, report: &DetectionReport) {
    match self {
      OutputWrapper::Log(output) => output.on_detections(report),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.on_detections(report);
      }
    }
  }
}

// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{DetectionReport, DetectionSink},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("记录目录路径无效: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把每帧检测结果写成 JSON 文件，按日期分目录存放
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let path = urlencoding::decode(uri.path())
      .map_err(|e| DirectoryRecordOutputError::InvalidPath(e.to_string()))?;
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput::new(PathBuf::from(path.as_ref())).with_always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: PathBuf) -> Self {
    Self {
      directory,
      frame_counters: Arc::new(Mutex::new(0)),
      always: false,
    }
  }

  /// 是否连未检测到物体的帧也记录
  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  fn frame_id(&self) -> u16 {
    // 计数器只做文件名去重，锁中毒时沿用旧值
    let mut counter = match self.frame_counters.lock() {
      Ok(counter) => counter,
      Err(poisoned) => poisoned.into_inner(),
    };
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    let filename = format!("{}-{:04X}.json", now.format("%H-%M-%S"), self.frame_id());
    Ok(directory.join(filename))
  }

  /// 写入一条记录，返回记录文件路径；空结果且未设置 `always` 时不写入
  pub fn record(
    &self,
    report: &DetectionReport,
  ) -> Result<Option<PathBuf>, DirectoryRecordOutputError> {
    if !self.always && report.is_empty() {
      return Ok(None);
    }

    let path = self.frame_path()?;
    let record = to_record(report);
    std::fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
    debug!("帧 {} 的结果已记录到 {}", report.frame_index, path.display());
    Ok(Some(path))
  }
}

fn to_record(report: &DetectionReport) -> Value {
  let detections: Vec<Value> = report
    .detections
    .iter()
    .map(|d| {
      json!({
        "label": d.label,
        "class_id": d.class_id,
        "confidence": d.confidence,
        "bbox": [d.bbox.left, d.bbox.top, d.bbox.right, d.bbox.bottom],
      })
    })
    .collect();

  json!({
    "frame_index": report.frame_index,
    "width": report.width,
    "height": report.height,
    "inference_ms": report.inference_time.as_secs_f64() * 1000.0,
    "counts": report.counts,
    "detections": detections,
  })
}

impl DetectionSink for DirectoryRecordOutput {
  fn on_detections(&self, report: &DetectionReport) {
    if let Err(e) = self.record(report) {
      error!("记录帧 {} 失败: {}", report.frame_index, e);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::postprocess::{BBox, Detection};

  fn report(detections: Vec<Detection>) -> DetectionReport {
    DetectionReport::new(7, 1280, 960, detections, Duration::from_millis(5))
  }

  #[test]
  fn writes_dated_json_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path().to_path_buf());
    let path = output
      .record(&report(vec![Detection {
        label: "dog".to_string(),
        class_id: 16,
        confidence: 0.75,
        bbox: BBox::new(10.0, 20.0, 110.0, 220.0),
      }]))
      .unwrap()
      .unwrap();

    assert!(path.starts_with(dir.path()));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));
    // 年/月/日 三级目录
    let relative = path.strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 4);

    let value: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(value["frame_index"], 7);
    assert_eq!(value["counts"]["dog"], 1);
    assert_eq!(value["detections"][0]["label"], "dog");
    assert_eq!(value["detections"][0]["bbox"][2], 110.0);
  }

  #[test]
  fn skips_empty_frames_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path().to_path_buf());
    assert!(output.record(&report(Vec::new())).unwrap().is_none());

    let output = output.with_always(true);
    assert!(output.record(&report(Vec::new())).unwrap().is_some());
  }

  #[test]
  fn parses_folder_url() {
    let url = url::Url::parse("folder:///tmp/records?always").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.directory, PathBuf::from("/tmp/records"));
    assert!(output.always);

    let url = url::Url::parse("file:///tmp/records").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::SchemeMismatch)
    ));
  }
}

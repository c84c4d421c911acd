// 该文件是 Qianli （千里眼） 项目的一部分。
// src/config.rs - 检测参数配置
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

use std::str::FromStr;

use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_MODEL_INPUT_SIZE: usize = 640;
pub const DEFAULT_NUM_CLASSES: usize = 80;
pub const DEFAULT_NUM_ANCHORS: usize = 8400;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
pub const DEFAULT_FRAME_SKIP_INTERVAL: u64 = 3;
pub const DEFAULT_MIN_PROCESSING_INTERVAL_MS: u64 = 200;
/// 模型输入边长上限，保证像素坐标能放进 u32 且张量大小可控
pub const MAX_MODEL_INPUT_SIZE: usize = 4096;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("参数 {key} 的取值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("模型输入尺寸不能为 0")]
  ZeroInputSize,
  #[error("模型输入尺寸 {size} 超过上限 {max}")]
  InputSizeTooLarge { size: usize, max: usize },
  #[error("类别数量不能为 0")]
  ZeroClasses,
  #[error("跳帧间隔不能为 0")]
  ZeroSkipInterval,
  #[error("{name} 阈值 {value} 超出 [0, 1] 范围")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
}

/// 模型输出框坐标的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxUnits {
  /// 以模型输入像素为单位
  #[default]
  Pixels,
  /// 归一化到 [0, 1]
  Normalized,
}

impl FromStr for BoxUnits {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pixels" | "pixel" => Ok(BoxUnits::Pixels),
      "normalized" | "norm" => Ok(BoxUnits::Normalized),
      _ => Err(ConfigError::InvalidValue {
        key: "units".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub model_input_size: usize,
  pub num_classes: usize,
  /// 推理引擎无法报告输出形状时使用的锚点数量
  pub num_anchors: usize,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub frame_skip_interval: u64,
  pub min_processing_interval_ms: u64,
  pub box_units: BoxUnits,
  /// 为 true 时仅在同类别的框之间做抑制
  pub class_aware_nms: bool,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      model_input_size: DEFAULT_MODEL_INPUT_SIZE,
      num_classes: DEFAULT_NUM_CLASSES,
      num_anchors: DEFAULT_NUM_ANCHORS,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      frame_skip_interval: DEFAULT_FRAME_SKIP_INTERVAL,
      min_processing_interval_ms: DEFAULT_MIN_PROCESSING_INTERVAL_MS,
      box_units: BoxUnits::default(),
      class_aware_nms: false,
    }
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

impl DetectorConfig {
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn with_frame_skip_interval(mut self, interval: u64) -> Self {
    self.frame_skip_interval = interval;
    self
  }

  pub fn with_min_processing_interval_ms(mut self, interval_ms: u64) -> Self {
    self.min_processing_interval_ms = interval_ms;
    self
  }

  pub fn with_model_input_size(mut self, size: usize) -> Self {
    self.model_input_size = size;
    self
  }

  pub fn with_num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn with_num_anchors(mut self, num_anchors: usize) -> Self {
    self.num_anchors = num_anchors;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.model_input_size == 0 {
      return Err(ConfigError::ZeroInputSize);
    }
    if self.model_input_size > MAX_MODEL_INPUT_SIZE {
      return Err(ConfigError::InputSizeTooLarge {
        size: self.model_input_size,
        max: MAX_MODEL_INPUT_SIZE,
      });
    }
    if self.num_classes == 0 {
      return Err(ConfigError::ZeroClasses);
    }
    if self.frame_skip_interval == 0 {
      return Err(ConfigError::ZeroSkipInterval);
    }
    for (name, value) in [
      ("置信度", self.confidence_threshold),
      ("NMS", self.nms_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }
    Ok(())
  }

  /// 用 URL 查询参数覆盖配置项，未识别的参数交给其他组件处理
  pub fn apply_query(&mut self, url: &Url) -> Result<(), ConfigError> {
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "confidence" => self.confidence_threshold = parse_value(&k, &v)?,
        "nms" => self.nms_threshold = parse_value(&k, &v)?,
        "skip" => self.frame_skip_interval = parse_value(&k, &v)?,
        "interval" => self.min_processing_interval_ms = parse_value(&k, &v)?,
        "input" => self.model_input_size = parse_value(&k, &v)?,
        "classes" => self.num_classes = parse_value(&k, &v)?,
        "anchors" => self.num_anchors = parse_value(&k, &v)?,
        "units" => self.box_units = v.parse()?,
        "per_class" => self.class_aware_nms = parse_value(&k, &v)?,
        _ => {
          debug!("忽略未知配置参数: {}={}", k, v);
          continue;
        }
      }
      debug!("配置参数覆盖: {}={}", k, v);
    }
    self.validate()
  }

  pub fn from_url(url: &Url) -> Result<Self, ConfigError> {
    let mut config = Self::default();
    config.apply_query(url)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_reference_deployment() {
    let config = DetectorConfig::default();
    assert_eq!(config.model_input_size, 640);
    assert_eq!(config.num_classes, 80);
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.nms_threshold, 0.4);
    assert_eq!(config.frame_skip_interval, 3);
    assert_eq!(config.min_processing_interval_ms, 200);
    assert_eq!(config.box_units, BoxUnits::Pixels);
    assert!(!config.class_aware_nms);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn query_overrides_are_applied() {
    let url = Url::parse(
      "rknn:///models/yolov8n.rknn?confidence=0.25&nms=0.5&skip=1&interval=0&units=normalized&per_class=true&labels=x.json",
    )
    .unwrap();
    let config = DetectorConfig::from_url(&url).unwrap();
    assert_eq!(config.confidence_threshold, 0.25);
    assert_eq!(config.nms_threshold, 0.5);
    assert_eq!(config.frame_skip_interval, 1);
    assert_eq!(config.min_processing_interval_ms, 0);
    assert_eq!(config.box_units, BoxUnits::Normalized);
    assert!(config.class_aware_nms);
  }

  #[test]
  fn invalid_values_are_rejected() {
    let url = Url::parse("rknn:///m.rknn?confidence=high").unwrap();
    assert!(matches!(
      DetectorConfig::from_url(&url),
      Err(ConfigError::InvalidValue { .. })
    ));

    let url = Url::parse("rknn:///m.rknn?skip=0").unwrap();
    assert_eq!(
      DetectorConfig::from_url(&url),
      Err(ConfigError::ZeroSkipInterval)
    );

    let config = DetectorConfig::default().with_nms_threshold(1.5);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::ThresholdOutOfRange { .. })
    ));
  }

  #[test]
  fn oversized_input_is_rejected() {
    let url = Url::parse("rknn:///m.rknn?input=4294967297").unwrap();
    assert_eq!(
      DetectorConfig::from_url(&url),
      Err(ConfigError::InputSizeTooLarge {
        size: 4_294_967_297,
        max: MAX_MODEL_INPUT_SIZE,
      })
    );

    let config = DetectorConfig::default().with_model_input_size(MAX_MODEL_INPUT_SIZE);
    assert_eq!(config.validate(), Ok(()));
    let config = config.with_model_input_size(MAX_MODEL_INPUT_SIZE + 1);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InputSizeTooLarge { .. })
    ));
  }
}

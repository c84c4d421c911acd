// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型描述与推理适配
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

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  config::{ConfigError, DetectorConfig, MAX_MODEL_INPUT_SIZE},
  output::{Status, StatusSink},
  tensor::{InputTensor, OutputTensor, RGB_CHANNELS},
};

/// 框编码占用的行数 (cx, cy, w, h)
pub const BOX_ROWS: usize = 4;

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("推理引擎拒绝加载模型: {0}")]
  EngineRejected(String),
  #[error("推理引擎不可用: {0}")]
  EngineUnavailable(String),
  #[error("模型输出形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: [usize; 3],
    actual: Vec<usize>,
  },
  #[error("类别表长度 {actual} 与类别数量 {expected} 不一致")]
  LabelCountMismatch { expected: usize, actual: usize },
  #[error("类别表文件无效: {0}")]
  InvalidLabels(String),
  #[error("模型路径无效: {0}")]
  InvalidPath(String),
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(String),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
}

#[derive(Error, Debug, PartialEq)]
pub enum InferenceError {
  #[error("推理引擎错误: {0}")]
  Engine(String),
  #[error("输入张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputSizeMismatch { expected: usize, actual: usize },
  #[error("输出张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  OutputSizeMismatch { expected: usize, actual: usize },
}

impl InferenceError {
  pub fn engine(e: impl std::fmt::Display) -> Self {
    InferenceError::Engine(e.to_string())
  }
}

/// 已加载模型的不可变描述
#[derive(Debug, Clone)]
pub struct ModelMetadata {
  input_size: usize,
  output_shape: [usize; 3],
  labels: Arc<[String]>,
}

impl ModelMetadata {
  pub fn new(
    input_size: usize,
    output_shape: [usize; 3],
    labels: impl Into<Arc<[String]>>,
  ) -> Result<Self, ModelLoadError> {
    if input_size == 0 {
      return Err(ConfigError::ZeroInputSize.into());
    }
    if input_size > MAX_MODEL_INPUT_SIZE {
      return Err(
        ConfigError::InputSizeTooLarge {
          size: input_size,
          max: MAX_MODEL_INPUT_SIZE,
        }
        .into(),
      );
    }
    let labels = labels.into();
    let num_classes = output_shape[1].saturating_sub(BOX_ROWS);
    if output_shape[0] != 1 || output_shape[1] <= BOX_ROWS {
      return Err(ModelLoadError::ShapeMismatch {
        expected: [1, BOX_ROWS + labels.len(), output_shape[2]],
        actual: output_shape.to_vec(),
      });
    }
    if labels.len() != num_classes {
      return Err(ModelLoadError::LabelCountMismatch {
        expected: num_classes,
        actual: labels.len(),
      });
    }
    Ok(Self {
      input_size,
      output_shape,
      labels,
    })
  }

  pub fn input_size(&self) -> usize {
    self.input_size
  }

  pub fn input_len(&self) -> usize {
    self.input_size * self.input_size * RGB_CHANNELS
  }

  pub fn output_shape(&self) -> [usize; 3] {
    self.output_shape
  }

  pub fn num_classes(&self) -> usize {
    self.output_shape[1] - BOX_ROWS
  }

  pub fn num_anchors(&self) -> usize {
    self.output_shape[2]
  }

  pub fn labels(&self) -> &Arc<[String]> {
    &self.labels
  }

  pub fn label(&self, class_id: usize) -> &str {
    self.labels.get(class_id).map(String::as_str).unwrap_or("unknown")
  }
}

/// 不透明的推理引擎，只暴露一次同步推理调用
pub trait InferenceEngine {
  /// 引擎协商得到的输出形状
  fn output_shape(&self) -> Vec<usize>;

  /// 读取 `input`，并完整覆盖 `output`
  fn infer(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), InferenceError>;
}

/// 从模型文件内容创建推理引擎
pub trait EngineFactory {
  fn create(
    &self,
    model: &[u8],
    config: &DetectorConfig,
  ) -> Result<Box<dyn InferenceEngine>, ModelLoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
  /// Rockchip NPU 推理
  Rknn,
  /// 预先录制的输出张量
  Canned,
}

impl EngineKind {
  pub fn factory(&self) -> Result<Box<dyn EngineFactory>, ModelLoadError> {
    match self {
      #[cfg(feature = "rknpu_engine")]
      EngineKind::Rknn => Ok(Box::new(rknn::RknnFactory::default())),
      #[cfg(not(feature = "rknpu_engine"))]
      EngineKind::Rknn => Err(ModelLoadError::EngineUnavailable(
        "未启用 rknpu_engine 特性".to_string(),
      )),
      EngineKind::Canned => Ok(Box::new(canned::CannedFactory)),
    }
  }
}

/// 模型来源，例如 `rknn:///models/yolov8n.rknn?confidence=0.5&labels=/models/coco.json`
#[derive(Debug, Clone)]
pub struct ModelSource {
  pub kind: EngineKind,
  pub path: PathBuf,
  pub labels: Option<PathBuf>,
  pub config: DetectorConfig,
}

const RKNN_SCHEME: &str = "rknn";
const CANNED_SCHEME: &str = "canned";

impl FromUrl for ModelSource {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let kind = match url.scheme() {
      RKNN_SCHEME => EngineKind::Rknn,
      CANNED_SCHEME => EngineKind::Canned,
      _ => {
        return Err(ModelLoadError::SchemeMismatch(format!(
          "{} 或 {}",
          RKNN_SCHEME, CANNED_SCHEME
        )));
      }
    };

    let labels = url
      .query_pairs()
      .find(|(k, _)| k == "labels")
      .map(|(_, v)| PathBuf::from(v.as_ref()));

    let path = urlencoding::decode(url.path())
      .map_err(|e| ModelLoadError::InvalidPath(e.to_string()))?;

    Ok(ModelSource {
      kind,
      path: PathBuf::from(path.as_ref()),
      labels,
      config: DetectorConfig::from_url(url)?,
    })
  }
}

enum AdapterState {
  Ready {
    engine: Box<dyn InferenceEngine>,
    metadata: ModelMetadata,
    output: OutputTensor,
  },
  Disabled {
    reason: String,
  },
}

/// 持有推理引擎与输出缓冲区；加载失败时退化为“无检测结果”模式
pub struct InferenceAdapter {
  state: AdapterState,
}

impl InferenceAdapter {
  /// 依次执行加载的各个阶段，失败时返回禁用状态的适配器并报告一次
  pub fn load(source: &ModelSource, status: &dyn StatusSink) -> Self {
    let result = source
      .kind
      .factory()
      .and_then(|factory| Self::try_load(source, factory.as_ref(), status));
    Self::settle(result, status)
  }

  pub fn load_with(
    source: &ModelSource,
    factory: &dyn EngineFactory,
    status: &dyn StatusSink,
  ) -> Self {
    let result = Self::try_load(source, factory, status);
    Self::settle(result, status)
  }

  fn settle(result: Result<Self, ModelLoadError>, status: &dyn StatusSink) -> Self {
    match result {
      Ok(adapter) => {
        info!("模型加载完成");
        status.on_status(&Status::Ready);
        adapter
      }
      Err(e) => {
        error!("模型加载失败, 检测功能已禁用: {}", e);
        status.on_status(&Status::LoadFailed(e.to_string()));
        Self::disabled(e.to_string())
      }
    }
  }

  fn try_load(
    source: &ModelSource,
    factory: &dyn EngineFactory,
    status: &dyn StatusSink,
  ) -> Result<Self, ModelLoadError> {
    status.on_status(&Status::LoadingModel(source.path.display().to_string()));
    info!("加载模型文件: {}", source.path.display());
    let model_data = std::fs::read(&source.path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    status.on_status(&Status::InitializingEngine);
    info!("创建推理引擎");
    let engine = factory.create(&model_data, &source.config)?;

    status.on_status(&Status::InspectingOutput);
    let shape = engine.output_shape();
    debug!("模型输出形状: {:?}", shape);
    let config = &source.config;
    let expected = [1, BOX_ROWS + config.num_classes, config.num_anchors];
    let output_shape: [usize; 3] = match shape.as_slice() {
      &[1, features, anchors] if features == expected[1] && anchors > 0 => [1, features, anchors],
      _ => {
        return Err(ModelLoadError::ShapeMismatch {
          expected,
          actual: shape.clone(),
        });
      }
    };

    let labels = match &source.labels {
      Some(path) => labels::load_labels(path)?,
      None => labels::coco_labels(),
    };
    let metadata = ModelMetadata::new(config.model_input_size, output_shape, labels)?;

    status.on_status(&Status::AllocatingBuffers);
    Ok(Self::from_engine(engine, metadata))
  }

  pub fn from_engine(engine: Box<dyn InferenceEngine>, metadata: ModelMetadata) -> Self {
    let output = OutputTensor::new(metadata.output_shape());
    debug!("输出缓冲区已分配: {} 个 float32", output.len());
    Self {
      state: AdapterState::Ready {
        engine,
        metadata,
        output,
      },
    }
  }

  pub fn disabled(reason: impl Into<String>) -> Self {
    Self {
      state: AdapterState::Disabled {
        reason: reason.into(),
      },
    }
  }

  pub fn is_ready(&self) -> bool {
    matches!(self.state, AdapterState::Ready { .. })
  }

  pub fn disabled_reason(&self) -> Option<&str> {
    match &self.state {
      AdapterState::Disabled { reason } => Some(reason),
      AdapterState::Ready { .. } => None,
    }
  }

  pub fn metadata(&self) -> Option<&ModelMetadata> {
    match &self.state {
      AdapterState::Ready { metadata, .. } => Some(metadata),
      AdapterState::Disabled { .. } => None,
    }
  }

  /// 按模型描述分配一个匹配的输入张量
  pub fn allocate_input(&self) -> Option<InputTensor> {
    self.metadata().map(|m| InputTensor::new(m.input_size()))
  }

  /// 执行一次推理
  ///
  /// 引擎不可用时返回 `Ok(None)`，表示本帧没有检测结果。
  pub fn run(&mut self, input: &InputTensor) -> Result<Option<&OutputTensor>, InferenceError> {
    match &mut self.state {
      AdapterState::Disabled { .. } => Ok(None),
      AdapterState::Ready {
        engine,
        metadata,
        output,
      } => {
        if input.len() != metadata.input_len() {
          return Err(InferenceError::InputSizeMismatch {
            expected: metadata.input_len(),
            actual: input.len(),
          });
        }
        if let Err(e) = engine.infer(input.as_slice(), output.as_mut_slice()) {
          warn!("推理失败: {}", e);
          return Err(e);
        }
        Ok(Some(&*output))
      }
    }
  }
}

pub mod canned;
pub mod labels;
#[cfg(feature = "rknpu_engine")]
pub mod rknn;

// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/canned.rs - 预录输出的推理引擎
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

//! 不依赖真实模型的推理引擎，按顺序循环返回预先给定的输出张量。
//!
//! 模型文件格式为 JSON：
//!
//! ```json
//! { "shape": [1, 84, 8400], "outputs": [[0.0, ...], ...] }
//! ```
//!
//! `outputs` 可省略，此时每次推理都输出全零张量。

use serde_json::Value;
use tracing::debug;

use crate::{
  config::DetectorConfig,
  model::{EngineFactory, InferenceEngine, InferenceError, ModelLoadError},
};

pub struct CannedEngine {
  shape: [usize; 3],
  outputs: Vec<Box<[f32]>>,
  cursor: usize,
  /// 失败信息与剩余失败次数
  failure: Option<(String, usize)>,
}

impl CannedEngine {
  pub fn new(shape: [usize; 3]) -> Self {
    Self {
      shape,
      outputs: Vec::new(),
      cursor: 0,
      failure: None,
    }
  }

  pub fn with_output(mut self, output: Vec<f32>) -> Self {
    self.outputs.push(output.into_boxed_slice());
    self
  }

  /// 每次推理都以给定信息失败
  pub fn failing(self, message: impl Into<String>) -> Self {
    self.failing_times(message, usize::MAX)
  }

  /// 前 `times` 次推理失败，之后恢复正常
  pub fn failing_times(mut self, message: impl Into<String>, times: usize) -> Self {
    self.failure = Some((message.into(), times));
    self
  }

  fn expected_len(&self) -> usize {
    self.shape.iter().product()
  }
}

impl InferenceEngine for CannedEngine {
  fn output_shape(&self) -> Vec<usize> {
    self.shape.to_vec()
  }

  fn infer(&mut self, _input: &[f32], output: &mut [f32]) -> Result<(), InferenceError> {
    if let Some((message, remaining)) = &mut self.failure {
      if *remaining > 0 {
        // usize::MAX 表示永远失败
        if *remaining != usize::MAX {
          *remaining -= 1;
        }
        return Err(InferenceError::Engine(message.clone()));
      }
    }
    if output.len() != self.expected_len() {
      return Err(InferenceError::OutputSizeMismatch {
        expected: self.expected_len(),
        actual: output.len(),
      });
    }

    if self.outputs.is_empty() {
      output.fill(0.0);
      return Ok(());
    }

    let canned = &self.outputs[self.cursor % self.outputs.len()];
    self.cursor = self.cursor.wrapping_add(1);
    if canned.len() != output.len() {
      return Err(InferenceError::OutputSizeMismatch {
        expected: output.len(),
        actual: canned.len(),
      });
    }
    output.copy_from_slice(canned);
    Ok(())
  }
}

pub struct CannedFactory;

impl EngineFactory for CannedFactory {
  fn create(
    &self,
    model: &[u8],
    _config: &DetectorConfig,
  ) -> Result<Box<dyn InferenceEngine>, ModelLoadError> {
    let rejected = |msg: String| ModelLoadError::EngineRejected(msg);
    let value: Value = serde_json::from_slice(model).map_err(|e| rejected(e.to_string()))?;

    let shape = value
      .get("shape")
      .and_then(Value::as_array)
      .ok_or_else(|| rejected("缺少 shape 字段".to_string()))?
      .iter()
      .map(|v| v.as_u64().map(|n| n as usize))
      .collect::<Option<Vec<_>>>()
      .ok_or_else(|| rejected("shape 必须是整数数组".to_string()))?;
    let shape: [usize; 3] = shape
      .try_into()
      .map_err(|s: Vec<usize>| rejected(format!("shape 必须是三维: {:?}", s)))?;

    let mut engine = CannedEngine::new(shape);
    let outputs = value
      .get("outputs")
      .and_then(Value::as_array)
      .cloned()
      .unwrap_or_default();
    for (idx, output) in outputs.iter().enumerate() {
      let data = output
        .as_array()
        .ok_or_else(|| rejected(format!("第 {} 个输出必须是数组", idx)))?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| rejected(format!("第 {} 个输出包含非数值", idx)))?;
      if data.len() != engine.expected_len() {
        return Err(rejected(format!(
          "第 {} 个输出长度 {} 与形状 {:?} 不符",
          idx,
          data.len(),
          shape
        )));
      }
      engine = engine.with_output(data);
    }

    debug!("预录引擎: 形状 {:?}, {} 个输出", shape, engine.outputs.len());
    Ok(Box::new(engine))
  }
}

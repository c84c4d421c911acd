// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/rknn.rs - RKNN 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error};

use crate::{
  config::DetectorConfig,
  model::{BOX_ROWS, EngineFactory, InferenceEngine, InferenceError, ModelLoadError},
};

const RKNN_NUM_INPUTS: u32 = 1;

pub struct RknnEngine {
  context: Context,
  shape: [usize; 3],
  // float32 输入按本机字节序展开后的暂存区，跨帧复用
  scratch: Vec<u8>,
}

impl InferenceEngine for RknnEngine {
  fn output_shape(&self) -> Vec<usize> {
    self.shape.to_vec()
  }

  fn infer(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), InferenceError> {
    self.scratch.clear();
    for value in input {
      self.scratch.extend_from_slice(&value.to_ne_bytes());
    }

    debug!("设置模型输入");
    self
      .context
      .set_input(0, &self.scratch, TensorFormat::NHWC, TensorType::Float32)
      .map_err(InferenceError::engine)?;

    debug!("执行模型推理");
    self.context.run().map_err(InferenceError::engine)?;

    debug!("获取模型输出");
    let outputs = self.context.get_outputs().map_err(InferenceError::engine)?;
    let data = outputs.get_f32(0).map_err(InferenceError::engine)?;
    if data.len() != output.len() {
      error!("输出长度 {} 与期望 {} 不符", data.len(), output.len());
      return Err(InferenceError::OutputSizeMismatch {
        expected: output.len(),
        actual: data.len(),
      });
    }
    output.copy_from_slice(data);
    Ok(())
  }
}

#[derive(Default)]
pub struct RknnFactory {
  flags: InitFlags,
}

impl RknnFactory {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl EngineFactory for RknnFactory {
  fn create(
    &self,
    model: &[u8],
    config: &DetectorConfig,
  ) -> Result<Box<dyn InferenceEngine>, ModelLoadError> {
    let rejected = |e: rknpu::Error| ModelLoadError::EngineRejected(e.to_string());

    let context = Context::new(model, self.flags.clone()).map_err(rejected)?;

    if let Ok(version) = context.sdk_version() {
      if let Ok(api_ver) = version.api_version() {
        debug!("模型 API 版本: {}", api_ver);
      }
      if let Ok(drv_ver) = version.driver_version() {
        debug!("模型驱动版本: {}", drv_ver);
      }
    }

    let num_inputs = context.num_inputs().map_err(rejected)?;
    let num_outputs = context.num_outputs().map_err(rejected)?;
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    if num_inputs != RKNN_NUM_INPUTS || num_outputs == 0 {
      return Err(ModelLoadError::EngineRejected(format!(
        "预期 {} 个输入和至少 1 个输出, 实际为 {} 个输入, {} 个输出",
        RKNN_NUM_INPUTS, num_inputs, num_outputs
      )));
    }

    // 运行时不报告输出形状，按配置协商，首帧推理时再校验长度
    let shape = [1, BOX_ROWS + config.num_classes, config.num_anchors];
    let input_len = config.model_input_size * config.model_input_size * 3;

    Ok(Box::new(RknnEngine {
      context,
      shape,
      scratch: Vec::with_capacity(input_len * std::mem::size_of::<f32>()),
    }))
  }
}

// 该文件是 Qianli （千里眼） 项目的一部分。
// src/tensor.rs - 模型输入输出张量缓冲区
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

//! 固定形状、跨帧复用的张量缓冲区。
//!
//! 两种张量都在模型加载时按 [`ModelMetadata`](crate::model::ModelMetadata)
//! 分配一次，之后每帧原地覆盖，不再重新分配。

pub const RGB_CHANNELS: usize = 3;

/// NHWC 布局的 float32 输入张量，取值归一化到 [0, 1]
#[derive(Debug, Clone)]
pub struct InputTensor {
  size: usize,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn new(size: usize) -> Self {
    Self {
      size,
      data: vec![0.0; size * size * RGB_CHANNELS].into_boxed_slice(),
    }
  }

  /// 正方形输入的边长
  pub fn size(&self) -> usize {
    self.size
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }

  /// (x, y) 处像素的三个通道
  pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
    let offset = (y * self.size + x) * RGB_CHANNELS;
    &self.data[offset..offset + RGB_CHANNELS]
  }
}

/// 形状为 `[batch, 4 + num_classes, num_anchors]` 的原始输出张量
///
/// 第 0-3 行为框编码 (cx, cy, w, h)，之后每行对应一个类别的得分。
#[derive(Debug, Clone)]
pub struct OutputTensor {
  shape: [usize; 3],
  data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(shape: [usize; 3]) -> Self {
    let len = shape.iter().product();
    Self {
      shape,
      data: vec![0.0; len].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> [usize; 3] {
    self.shape
  }

  pub fn num_features(&self) -> usize {
    self.shape[1]
  }

  pub fn num_anchors(&self) -> usize {
    self.shape[2]
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }

  /// 第一个批次中某个特征行的全部锚点值
  pub fn row(&self, feature: usize) -> &[f32] {
    let anchors = self.num_anchors();
    &self.data[feature * anchors..(feature + 1) * anchors]
  }

  pub fn row_mut(&mut self, feature: usize) -> &mut [f32] {
    let anchors = self.num_anchors();
    &mut self.data[feature * anchors..(feature + 1) * anchors]
  }

  pub fn value(&self, feature: usize, anchor: usize) -> f32 {
    self.data[feature * self.num_anchors() + anchor]
  }

  pub fn fill(&mut self, value: f32) {
    self.data.fill(value);
  }
}

// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - 相机原始帧定义
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

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("不支持的旋转角度: {0}")]
pub struct InvalidRotation(pub u32);

/// 传感器方向，只允许 90 度的整数倍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub fn degrees(&self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 旋转后宽高是否互换
  pub fn swaps_dimensions(&self) -> bool {
    matches!(self, Rotation::Deg90 | Rotation::Deg270)
  }
}

impl TryFrom<u32> for Rotation {
  type Error = InvalidRotation;

  fn try_from(degrees: u32) -> Result<Self, Self::Error> {
    match degrees {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      _ => Err(InvalidRotation(degrees)),
    }
  }
}

/// 单个图像平面，像素之间不一定连续
#[derive(Debug, Clone)]
pub struct Plane {
  data: Box<[u8]>,
  row_stride: usize,
  pixel_stride: usize,
}

impl Plane {
  pub fn new(data: impl Into<Box<[u8]>>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data: data.into(),
      row_stride,
      pixel_stride,
    }
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn row_stride(&self) -> usize {
    self.row_stride
  }

  pub fn pixel_stride(&self) -> usize {
    self.pixel_stride
  }

  /// 读取 (row, col) 处的采样，越界返回 None
  pub fn sample(&self, row: usize, col: usize) -> Option<u8> {
    self.sample_at(row, col, 0)
  }

  /// 在 (row, col) 的基础上再偏移 `extra` 字节读取，偏移溢出时返回 None
  pub fn sample_at(&self, row: usize, col: usize, extra: usize) -> Option<u8> {
    let offset = row
      .checked_mul(self.row_stride)?
      .checked_add(col.checked_mul(self.pixel_stride)?)?
      .checked_add(extra)?;
    self.data.get(offset).copied()
  }
}

/// 一次相机回调提供的亮度/色度平面帧
///
/// `planes[0]` 为 Y，`planes[1]` 为 Cb（U），可选的 `planes[2]` 为 Cr（V）。
/// 只有两个平面时视为 Cb/Cr 交错存放。
#[derive(Debug, Clone)]
pub struct RawFrame {
  width: usize,
  height: usize,
  planes: Vec<Plane>,
  rotation: Rotation,
}

impl RawFrame {
  pub fn new(width: usize, height: usize, planes: Vec<Plane>, rotation: Rotation) -> Self {
    Self {
      width,
      height,
      planes,
      rotation,
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn planes(&self) -> &[Plane] {
    &self.planes
  }

  pub fn rotation(&self) -> Rotation {
    self.rotation
  }

  /// 旋转之后的图像尺寸 (宽, 高)
  pub fn oriented_dimensions(&self) -> (usize, usize) {
    if self.rotation.swaps_dimensions() {
      (self.height, self.width)
    } else {
      (self.width, self.height)
    }
  }
}

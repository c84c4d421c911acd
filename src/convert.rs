// 该文件是 Qianli （千里眼） 项目的一部分。
// src/convert.rs - YUV 到 RGB 的颜色空间转换
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

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::frame::{Plane, RawFrame, Rotation};

const RGB_CHANNELS: usize = 3;
const NEUTRAL_CHROMA: u8 = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
  #[error("不支持的帧格式: 需要至少 2 个平面, 实际 {0} 个")]
  UnsupportedFormat(usize),
  #[error("无效的帧尺寸: {width}x{height}")]
  InvalidDimensions { width: usize, height: usize },
  #[error("亮度平面过小: 需要至少 {required} 字节, 实际 {actual} 字节")]
  PlaneTooSmall { required: usize, actual: usize },
}

/// ITU-R BT.601 整数变换，输入为 studio swing 的 YCbCr
#[inline]
pub fn yuv_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
  let c = y as i32 - 16;
  let d = cb as i32 - 128;
  let e = cr as i32 - 128;

  let r = (298 * c + 409 * e + 128) >> 8;
  let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
  let b = (298 * c + 516 * d + 128) >> 8;

  [
    r.clamp(0, 255) as u8,
    g.clamp(0, 255) as u8,
    b.clamp(0, 255) as u8,
  ]
}

/// 按顺时针方向旋转图像
pub fn orient(image: RgbImage, rotation: Rotation) -> RgbImage {
  match rotation {
    Rotation::Deg0 => image,
    Rotation::Deg90 => imageops::rotate90(&image),
    Rotation::Deg180 => imageops::rotate180(&image),
    Rotation::Deg270 => imageops::rotate270(&image),
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ColorConverter;

impl ColorConverter {
  pub fn new() -> Self {
    Self
  }

  /// 只检查平面数量，不读取像素
  pub fn check_format(&self, frame: &RawFrame) -> Result<(), ConvertError> {
    match frame.planes().len() {
      n if n < 2 => Err(ConvertError::UnsupportedFormat(n)),
      _ => Ok(()),
    }
  }

  pub fn convert(&self, frame: &RawFrame) -> Result<RgbImage, ConvertError> {
    self.check_format(frame)?;
    let planes = frame.planes();

    let (width, height) = (frame.width(), frame.height());
    let invalid = || ConvertError::InvalidDimensions { width, height };
    if width == 0 || height == 0 {
      return Err(invalid());
    }
    let width_u32 = u32::try_from(width).map_err(|_| invalid())?;
    let height_u32 = u32::try_from(height).map_err(|_| invalid())?;

    let luma = &planes[0];
    // 步长异常时偏移量可能溢出，按平面过小处理
    let required = (height - 1)
      .checked_mul(luma.row_stride())
      .and_then(|rows| rows.checked_add((width - 1).checked_mul(luma.pixel_stride())?))
      .and_then(|last| last.checked_add(1))
      .unwrap_or(usize::MAX);
    if luma.data().len() < required {
      return Err(ConvertError::PlaneTooSmall {
        required,
        actual: luma.data().len(),
      });
    }

    let cb_plane = &planes[1];
    let cr_plane = planes.get(2);

    debug!(
      "颜色转换: {}x{}, {} 个平面, 旋转 {} 度",
      width,
      height,
      planes.len(),
      frame.rotation().degrees()
    );

    let mut pixels = vec![0u8; width * height * RGB_CHANNELS];
    for (y, row) in pixels.chunks_exact_mut(width * RGB_CHANNELS).enumerate() {
      for (x, pixel) in row.chunks_exact_mut(RGB_CHANNELS).enumerate() {
        let luma_value = luma.sample(y, x).unwrap_or(0);
        let (cb, cr) = chroma_at(cb_plane, cr_plane, y, x);
        pixel.copy_from_slice(&yuv_to_rgb(luma_value, cb, cr));
      }
    }

    let image = RgbImage::from_raw(width_u32, height_u32, pixels).ok_or_else(invalid)?;
    Ok(orient(image, frame.rotation()))
  }
}

/// 读取像素 (y, x) 对应的半分辨率色度采样
fn chroma_at(cb_plane: &Plane, cr_plane: Option<&Plane>, y: usize, x: usize) -> (u8, u8) {
  let (row, col) = (y / 2, x / 2);
  let cb = cb_plane.sample(row, col).unwrap_or(NEUTRAL_CHROMA);
  let cr = match cr_plane {
    Some(plane) => plane.sample(row, col),
    // 只有一个交错平面时按 x 的奇偶取配对采样
    None => cb_plane.sample_at(row, col, x % 2),
  };
  (cb, cr.unwrap_or(NEUTRAL_CHROMA))
}

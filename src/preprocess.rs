// 该文件是 Qianli （千里眼） 项目的一部分。
// src/preprocess.rs - 模型输入预处理
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

use std::borrow::Cow;

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::tensor::{InputTensor, RGB_CHANNELS};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("输入张量尺寸 {actual} 与模型输入尺寸 {expected} 不一致")]
  TensorSizeMismatch { expected: usize, actual: usize },
  #[error("空图像无法预处理")]
  EmptyImage,
  #[error("模型输入尺寸 {0} 超出图像尺寸范围")]
  InputSizeTooLarge(usize),
}

/// 直接缩放（不加黑边）到模型输入尺寸，再写入归一化的 NHWC 张量
#[derive(Debug, Clone)]
pub struct Preprocessor {
  input_size: usize,
  filter: imageops::FilterType,
}

impl Preprocessor {
  pub fn new(input_size: usize) -> Self {
    Self {
      input_size,
      filter: imageops::FilterType::Triangle,
    }
  }

  pub fn with_filter(mut self, filter: imageops::FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn input_size(&self) -> usize {
    self.input_size
  }

  pub fn prepare(&self, image: &RgbImage, tensor: &mut InputTensor) -> Result<(), PreprocessError> {
    let side = u32::try_from(self.input_size)
      .map_err(|_| PreprocessError::InputSizeTooLarge(self.input_size))?;
    if tensor.size() != self.input_size() {
      return Err(PreprocessError::TensorSizeMismatch {
        expected: self.input_size(),
        actual: tensor.size(),
      });
    }
    if image.width() == 0 || image.height() == 0 {
      return Err(PreprocessError::EmptyImage);
    }

    let resized = if image.dimensions() == (side, side) {
      Cow::Borrowed(image)
    } else {
      debug!(
        "缩放图像 {}x{} -> {}x{}",
        image.width(),
        image.height(),
        side,
        side
      );
      Cow::Owned(imageops::resize(image, side, side, self.filter))
    };

    // 行优先、通道在后，与 RgbImage 的内存布局一致
    for (dst, src) in tensor
      .as_mut_slice()
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(resized.as_raw().chunks_exact(RGB_CHANNELS))
    {
      for (d, s) in dst.iter_mut().zip(src) {
        *d = *s as f32 / 255.0;
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  #[test]
  fn normalizes_into_existing_buffer() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(1, 0, Rgb([255, 0, 51]));
    let preprocessor = Preprocessor::new(2);
    let mut tensor = InputTensor::new(2);
    let before = tensor.as_slice().as_ptr();

    preprocessor.prepare(&image, &mut tensor).unwrap();

    assert_eq!(tensor.as_slice().as_ptr(), before);
    assert_eq!(tensor.pixel(1, 0), &[1.0, 0.0, 0.2]);
    assert_eq!(tensor.pixel(0, 1), &[0.0, 0.0, 0.0]);
  }

  #[test]
  fn resizes_to_square_input() {
    let image = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
    let preprocessor = Preprocessor::new(16);
    let mut tensor = InputTensor::new(16);
    preprocessor.prepare(&image, &mut tensor).unwrap();
    assert!(
      tensor
        .as_slice()
        .iter()
        .all(|v| (v - 1.0).abs() <= 1.0 / 255.0 + 1e-6)
    );
  }

  #[test]
  fn overwrites_previous_frame() {
    let preprocessor = Preprocessor::new(4);
    let mut tensor = InputTensor::new(4);
    let white = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
    let black = RgbImage::new(8, 8);
    preprocessor.prepare(&white, &mut tensor).unwrap();
    preprocessor.prepare(&black, &mut tensor).unwrap();
    assert!(tensor.as_slice().iter().all(|v| *v == 0.0));
  }

  #[test]
  fn rejects_mismatched_tensor() {
    let preprocessor = Preprocessor::new(8);
    let mut tensor = InputTensor::new(4);
    let image = RgbImage::new(8, 8);
    assert_eq!(
      preprocessor.prepare(&image, &mut tensor),
      Err(PreprocessError::TensorSizeMismatch {
        expected: 8,
        actual: 4
      })
    );
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn rejects_input_size_beyond_u32() {
    let size = u32::MAX as usize + 1;
    let preprocessor = Preprocessor::new(size);
    let mut tensor = InputTensor::new(2);
    let image = RgbImage::new(2, 2);
    assert_eq!(
      preprocessor.prepare(&image, &mut tensor),
      Err(PreprocessError::InputSizeTooLarge(size))
    );
    assert!(tensor.as_slice().iter().all(|v| *v == 0.0));
  }
}

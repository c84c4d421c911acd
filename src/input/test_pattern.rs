// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/test_pattern.rs - 测试图案输入
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
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawFrame,
  input::{FrameGeometry, GeometryError},
};

#[derive(Error, Debug)]
pub enum TestPatternInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("帧参数错误: {0}")]
  GeometryError(#[from] GeometryError),
  #[error("参数 frames 的值 {0} 无效")]
  InvalidFrameCount(String),
}

/// 生成亮度渐变的合成帧，没有相机时用于联调与压测
///
/// `pattern://local?width=640&height=480&frames=100`，省略 `frames` 时无限生成。
pub struct TestPatternInput {
  geometry: FrameGeometry,
  remaining: Option<usize>,
  index: usize,
}

impl FromUrlWithScheme for TestPatternInput {
  const SCHEME: &'static str = "pattern";
}

impl FromUrl for TestPatternInput {
  type Error = TestPatternInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(TestPatternInputError::SchemeMismatch);
    }

    let geometry = FrameGeometry::from_query(url)?;
    let remaining = match url.query_pairs().find(|(k, _)| k == "frames") {
      Some((_, v)) => Some(
        v.parse::<usize>()
          .map_err(|_| TestPatternInputError::InvalidFrameCount(v.to_string()))?,
      ),
      None => None,
    };
    debug!(
      "测试图案输入: {}x{}, 帧数 {:?}",
      geometry.width, geometry.height, remaining
    );

    Ok(TestPatternInput::new(geometry, remaining))
  }
}

impl TestPatternInput {
  pub fn new(geometry: FrameGeometry, frames: Option<usize>) -> Self {
    Self {
      geometry,
      remaining: frames,
      index: 0,
    }
  }

  fn render(&self) -> Vec<u8> {
    let FrameGeometry { width, height, .. } = self.geometry;
    let mut data = vec![128u8; self.geometry.frame_len()];
    // 斜向渐变，随帧序号平移
    for y in 0..height {
      for x in 0..width {
        data[y * width + x] = ((x + y + self.index) % 220 + 16) as u8;
      }
    }
    data
  }
}

impl Iterator for TestPatternInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(remaining) = self.remaining.as_mut() {
      if *remaining == 0 {
        return None;
      }
      *remaining -= 1;
    }

    let data = self.render();
    self.index = self.index.wrapping_add(1);
    let FrameGeometry {
      width,
      height,
      layout,
      rotation,
    } = self.geometry;
    Some(layout.split(width, height, &data, rotation))
  }
}

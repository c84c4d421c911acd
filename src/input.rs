// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input.rs - 原始帧输入
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
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InvalidRotation, Plane, RawFrame, Rotation},
};

mod test_pattern;
pub use self::test_pattern::{TestPatternInput, TestPatternInputError};

#[cfg(feature = "yuv_file_input")]
mod yuv_file;
#[cfg(feature = "yuv_file_input")]
pub use self::yuv_file::{YuvFileInput, YuvFileInputError};

/// 原始 YUV 4:2:0 帧的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YuvLayout {
  /// Y 平面后依次是 U、V 平面
  #[default]
  I420,
  /// Y 平面后是 UV 交错平面
  Nv12,
  /// Y 平面后是 VU 交错平面，Android 相机的默认格式
  Nv21,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("不支持的 YUV 布局: {0}")]
pub struct InvalidLayout(pub String);

impl FromStr for YuvLayout {
  type Err = InvalidLayout;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "i420" | "yuv420p" => Ok(YuvLayout::I420),
      "nv12" => Ok(YuvLayout::Nv12),
      "nv21" => Ok(YuvLayout::Nv21),
      _ => Err(InvalidLayout(s.to_string())),
    }
  }
}

impl YuvLayout {
  /// 一帧所占字节数
  pub fn frame_len(&self, width: usize, height: usize) -> usize {
    let (cw, ch) = chroma_dimensions(width, height);
    width * height + 2 * cw * ch
  }

  /// 按相机 HAL 的平面结构切分一帧数据
  ///
  /// 交错布局给出两个互相重叠、像素步长为 2 的色度平面。
  pub fn split(&self, width: usize, height: usize, data: &[u8], rotation: Rotation) -> RawFrame {
    let (cw, ch) = chroma_dimensions(width, height);
    let luma_len = (width * height).min(data.len());
    let (luma, chroma) = data.split_at(luma_len);
    let luma = Plane::new(luma, width, 1);

    let planes = match self {
      YuvLayout::I420 => {
        let (u, v) = chroma.split_at((cw * ch).min(chroma.len()));
        vec![luma, Plane::new(u, cw, 1), Plane::new(v, cw, 1)]
      }
      YuvLayout::Nv12 => {
        let cb = Plane::new(chroma, cw * 2, 2);
        let cr = Plane::new(chroma.get(1..).unwrap_or_default(), cw * 2, 2);
        vec![luma, cb, cr]
      }
      YuvLayout::Nv21 => {
        let cb = Plane::new(chroma.get(1..).unwrap_or_default(), cw * 2, 2);
        let cr = Plane::new(chroma, cw * 2, 2);
        vec![luma, cb, cr]
      }
    };

    RawFrame::new(width, height, planes, rotation)
  }
}

fn chroma_dimensions(width: usize, height: usize) -> (usize, usize) {
  (width.div_ceil(2), height.div_ceil(2))
}

/// 从 URL 查询参数中读取帧的几何描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
  pub width: usize,
  pub height: usize,
  pub layout: YuvLayout,
  pub rotation: Rotation,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数 {key} 的值 {value} 无效")]
  InvalidParameter { key: &'static str, value: String },
  #[error("{0}")]
  InvalidLayout(#[from] InvalidLayout),
  #[error("{0}")]
  InvalidRotation(#[from] InvalidRotation),
}

impl FrameGeometry {
  pub fn from_query(url: &Url) -> Result<Self, GeometryError> {
    let query = |key: &'static str| {
      url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
    };
    let dimension = |key: &'static str| -> Result<usize, GeometryError> {
      let value = query(key).ok_or(GeometryError::MissingParameter(key))?;
      match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(GeometryError::InvalidParameter { key, value }),
      }
    };

    let width = dimension("width")?;
    let height = dimension("height")?;
    let layout = match query("layout") {
      Some(layout) => layout.parse()?,
      None => YuvLayout::default(),
    };
    let rotation = match query("rotation") {
      Some(value) => {
        let degrees = value
          .parse::<u32>()
          .map_err(|_| GeometryError::InvalidParameter {
            key: "rotation",
            value: value.clone(),
          })?;
        Rotation::try_from(degrees)?
      }
      None => Rotation::Deg0,
    };

    Ok(FrameGeometry {
      width,
      height,
      layout,
      rotation,
    })
  }

  pub fn frame_len(&self) -> usize {
    self.layout.frame_len(self.width, self.height)
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("测试图案输入错误: {0}")]
  TestPatternInputError(#[from] TestPatternInputError),
  #[cfg(feature = "yuv_file_input")]
  #[error("YUV 文件输入错误: {0}")]
  YuvFileInputError(#[from] YuvFileInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  TestPattern(TestPatternInput),
  #[cfg(feature = "yuv_file_input")]
  YuvFile(YuvFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      TestPatternInput::SCHEME => Ok(InputWrapper::TestPattern(TestPatternInput::from_url(url)?)),
      #[cfg(feature = "yuv_file_input")]
      YuvFileInput::SCHEME => Ok(InputWrapper::YuvFile(YuvFileInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::TestPattern(input) => input.next(),
      #[cfg(feature = "yuv_file_input")]
      InputWrapper::YuvFile(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::convert::ColorConverter;

  /// 2x2 帧，Y 全 128，Cb=90，Cr=240
  fn chroma_bytes(layout: YuvLayout) -> Vec<u8> {
    let mut data = vec![128u8; 4];
    match layout {
      YuvLayout::I420 => data.extend([90, 240]),
      YuvLayout::Nv12 => data.extend([90, 240]),
      YuvLayout::Nv21 => data.extend([240, 90]),
    }
    data
  }

  #[test]
  fn every_layout_decodes_to_the_same_color() {
    let converter = ColorConverter::new();
    let colors: Vec<_> = [YuvLayout::I420, YuvLayout::Nv12, YuvLayout::Nv21]
      .into_iter()
      .map(|layout| {
        let frame = layout.split(2, 2, &chroma_bytes(layout), Rotation::Deg0);
        assert_eq!(frame.planes().len(), 3);
        *converter.convert(&frame).unwrap().get_pixel(1, 1)
      })
      .collect();
    assert_eq!(colors[0], colors[1]);
    assert_eq!(colors[0], colors[2]);
    // 偏红
    assert!(colors[0][0] > colors[0][2]);
  }

  #[test]
  fn frame_len_rounds_chroma_up() {
    assert_eq!(YuvLayout::I420.frame_len(4, 4), 24);
    assert_eq!(YuvLayout::Nv21.frame_len(3, 3), 9 + 8);
  }

  #[test]
  fn geometry_reads_query() {
    let url = Url::parse("yuv:///tmp/a.yuv?width=640&height=480&layout=nv21&rotation=90").unwrap();
    assert_eq!(
      FrameGeometry::from_query(&url),
      Ok(FrameGeometry {
        width: 640,
        height: 480,
        layout: YuvLayout::Nv21,
        rotation: Rotation::Deg90,
      })
    );

    let url = Url::parse("yuv:///tmp/a.yuv?width=640").unwrap();
    assert_eq!(
      FrameGeometry::from_query(&url),
      Err(GeometryError::MissingParameter("height"))
    );

    let url = Url::parse("yuv:///tmp/a.yuv?width=640&height=480&rotation=45").unwrap();
    assert_eq!(
      FrameGeometry::from_query(&url),
      Err(GeometryError::InvalidRotation(InvalidRotation(45)))
    );
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("v4l2:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}

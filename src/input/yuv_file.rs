// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/yuv_file.rs - 原始 YUV 文件输入
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

use std::{
  fs::File,
  io::{BufReader, ErrorKind, Read},
  path::PathBuf,
};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawFrame,
  input::{FrameGeometry, GeometryError},
};

#[derive(Error, Debug)]
pub enum YuvFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("文件路径无效: {0}")]
  InvalidPath(String),
  #[error("帧参数错误: {0}")]
  GeometryError(#[from] GeometryError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按固定帧长顺序读取原始 YUV 文件，例如从 Android 相机导出的 NV21 序列
///
/// `yuv:///data/capture.nv21?width=1280&height=960&layout=nv21&rotation=90`
pub struct YuvFileInput {
  path: PathBuf,
  geometry: FrameGeometry,
  reader: BufReader<File>,
  buffer: Vec<u8>,
  frames_read: usize,
}

impl FromUrlWithScheme for YuvFileInput {
  const SCHEME: &'static str = "yuv";
}

impl FromUrl for YuvFileInput {
  type Error = YuvFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(YuvFileInputError::SchemeMismatch);
    }

    let geometry = FrameGeometry::from_query(url)?;
    let path = urlencoding::decode(url.path())
      .map_err(|e| YuvFileInputError::InvalidPath(e.to_string()))?;
    Self::open(PathBuf::from(path.as_ref()), geometry)
  }
}

impl YuvFileInput {
  pub fn open(path: PathBuf, geometry: FrameGeometry) -> Result<Self, YuvFileInputError> {
    let file = File::open(&path)?;
    let frame_len = geometry.frame_len();
    if let Ok(meta) = file.metadata() {
      let len = meta.len() as usize;
      info!(
        "打开 YUV 文件 {}: {}x{} {:?}, 共 {} 帧",
        path.display(),
        geometry.width,
        geometry.height,
        geometry.layout,
        len / frame_len
      );
      if len % frame_len != 0 {
        debug!("文件末尾有 {} 字节不足一帧, 将被忽略", len % frame_len);
      }
    }

    Ok(Self {
      path,
      geometry,
      reader: BufReader::new(file),
      buffer: vec![0u8; frame_len],
      frames_read: 0,
    })
  }

  pub fn geometry(&self) -> FrameGeometry {
    self.geometry
  }

  pub fn frames_read(&self) -> usize {
    self.frames_read
  }
}

impl Iterator for YuvFileInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.reader.read_exact(&mut self.buffer) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        debug!("{} 读取完毕, 共 {} 帧", self.path.display(), self.frames_read);
        return None;
      }
      Err(e) => {
        error!("读取 {} 失败: {}", self.path.display(), e);
        return None;
      }
    }

    self.frames_read += 1;
    let FrameGeometry {
      width,
      height,
      layout,
      rotation,
    } = self.geometry;
    Some(layout.split(width, height, &self.buffer, rotation))
  }
}

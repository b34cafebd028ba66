// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{OpenError, Transport, TransportKind},
  url_path,
};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// 以静态图片代替摄像头，目录中的图片按文件名顺序循环读取
pub struct ImageFileInput {
  path: PathBuf,
  kind: TransportKind,
  files: Vec<PathBuf>,
  cursor: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = OpenError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(OpenError::Unsupported(url.to_string()));
    }

    Ok(ImageFileInput::new(url_path(url)))
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

impl ImageFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      kind: TransportKind::File,
      files: Vec::new(),
      cursor: 0,
    }
  }

  pub fn with_kind(mut self, kind: TransportKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn files(&self) -> &[PathBuf] {
    &self.files
  }
}

impl Transport for ImageFileInput {
  fn open(&mut self) -> Result<(), OpenError> {
    if self.path.is_dir() {
      let mut files = std::fs::read_dir(&self.path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image(path))
        .collect::<Vec<_>>();
      files.sort();
      if files.is_empty() {
        return Err(OpenError::DeviceMissing(format!(
          "{} 中没有图片",
          self.path.display()
        )));
      }
      self.files = files;
    } else if self.path.is_file() {
      self.files = vec![self.path.clone()];
    } else {
      return Err(OpenError::DeviceMissing(self.path.display().to_string()));
    }

    debug!("图片输入共 {} 个文件", self.files.len());
    self.cursor = 0;
    Ok(())
  }

  fn read(&mut self) -> Option<Frame> {
    if self.files.is_empty() {
      return None;
    }

    let path = &self.files[self.cursor % self.files.len()];
    self.cursor = (self.cursor + 1) % self.files.len();

    let image = ImageReader::open(path)
      .map_err(image::ImageError::IoError)
      .and_then(|reader| reader.decode());
    match image {
      Ok(image) => Some(Frame::from_rgb_image(image.into_rgb8())),
      Err(e) => {
        warn!("无法读取图片 {}: {}", path.display(), e);
        None
      }
    }
  }

  fn release(&mut self) {
    self.files.clear();
    self.cursor = 0;
  }

  fn kind(&self) -> TransportKind {
    self.kind
  }

  fn describe(&self) -> String {
    format!("image://{}", self.path.display())
  }
}

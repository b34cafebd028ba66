// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;

pub const RGB_CHANNELS: u8 = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("不支持的通道数: {0}")]
  UnsupportedChannels(u8),
}

/// 一帧交错存储（HWC）的像素数据
///
/// 帧由采集端产生，每个周期只交给推理端一次。
#[derive(Debug, Clone)]
pub struct Frame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  channels: u8,
  index: u64,
  timestamp_ms: u64,
}

impl Frame {
  pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, FrameError> {
    if !matches!(channels, 1 | 3 | 4) {
      return Err(FrameError::UnsupportedChannels(channels));
    }

    let expected = width as usize * height as usize * channels as usize;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
      channels,
      index: 0,
      timestamp_ms: 0,
    })
  }

  pub fn from_rgb_image(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
      channels: RGB_CHANNELS,
      index: 0,
      timestamp_ms: 0,
    }
  }

  pub fn with_index(mut self, index: u64, timestamp_ms: u64) -> Self {
    self.index = index;
    self.timestamp_ms = timestamp_ms;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> u8 {
    self.channels
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0 || self.data.is_empty()
  }

  /// 转为 RGB 图像，灰度帧复制到三个通道，RGBA 帧丢弃 alpha
  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width;
    let channels = self.channels as usize;
    let data = &self.data;

    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width as usize + x as usize) * channels;
      if channels == 1 {
        Rgb([data[idx]; 3])
      } else {
        Rgb([data[idx], data[idx + 1], data[idx + 2]])
      }
    })
  }

  /// 拉伸到指定尺寸，不保持宽高比
  pub fn stretch_to(&self, width: u32, height: u32) -> RgbImage {
    let image = self.to_rgb_image();
    if image.dimensions() == (width, height) {
      return image;
    }
    image::imageops::resize(&image, width, height, FilterType::Triangle)
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::from_rgb_image(image)
  }
}

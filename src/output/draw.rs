// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/output/draw.rs - 检测框与标签绘制
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

use std::{path::Path, sync::Arc};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{checkout::Report, frame::Frame};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 在帧上绘制检测框，加载了字体时同时绘制标签
#[derive(Clone)]
pub struct Draw {
  font: Option<Arc<FontVec>>,
  font_size: f32,
  box_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("已加载标签字体: {}", path.display());

    Ok(Self {
      font: Some(Arc::new(font)),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_report(&self, frame: &Frame, report: &Report) -> RgbImage {
    let mut image = frame.to_rgb_image();
    let (width, height) = image.dimensions();

    for detection in &report.detections {
      let rect = detection.item.to_pixels(width, height);
      let x_min = (rect.left.floor() as i32).clamp(0, width as i32 - 1);
      let y_min = (rect.top.floor() as i32).clamp(0, height as i32 - 1);
      let x_max = (rect.right.ceil() as i32).clamp(0, width as i32 - 1);
      let y_max = (rect.bottom.ceil() as i32).clamp(0, height as i32 - 1);
      if x_min >= x_max || y_min >= y_max {
        continue;
      }

      // 边框向内加粗
      for t in 0..BOX_THICKNESS {
        let w = x_max - x_min - 2 * t;
        let h = y_max - y_min - 2 * t;
        if w <= 0 || h <= 0 {
          break;
        }
        let outline = Rect::at(x_min + t, y_min + t).of_size(w as u32 + 1, h as u32 + 1);
        draw_hollow_rect_mut(&mut image, outline, Rgb(self.box_color));
      }

      if let Some(font) = &self.font {
        self.draw_label(&mut image, font, x_min, y_min, &detection.label());
      }
    }

    image
  }

  // 标签画在框的上方，空间不足时画在框内
  fn draw_label(&self, image: &mut RgbImage, font: &FontVec, x: i32, y: i32, label: &str) {
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, label);
    let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;
    let label_y = if y >= label_height { y - label_height } else { y };

    let max_width = (image.width() as i32 - x).max(0) as u32;
    let label_width = text_width.min(max_width);
    if label_width == 0 || label_height <= 0 {
      return;
    }

    let background = Rect::at(x, label_y).of_size(label_width, label_height as u32);
    draw_filled_rect_mut(image, background, Rgb(self.box_color));
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      label,
    );
  }
}

// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/output/directory_record.rs - 按日期归档的记录输出
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
  io::BufWriter,
  path::PathBuf,
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Local};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  checkout::Report,
  frame::Frame,
  output::{Render, draw::Draw},
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把每一帧的标注图像和结账记录写入 `<dir>/<年>/<月>/<日>/`
///
/// 默认只记录有检测结果的帧，URL 带 `?always` 时记录所有帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(DirectoryRecordOutput::new(url_path(uri)).with_always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      draw: Draw::default(),
      frame_counter: AtomicU32::new(0),
      always: false,
    }
  }

  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// 返回不带扩展名的记录路径
  fn record_stem(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, report: &Report) -> Result<(), Self::Error> {
    if !self.always && report.is_empty() {
      return Ok(());
    }

    let stem = self.record_stem()?;
    let image_path = stem.with_extension("png");
    self.draw.draw_report(frame, report).save(&image_path)?;

    let json_path = stem.with_extension("json");
    let writer = BufWriter::new(File::create(&json_path)?);
    serde_json::to_writer_pretty(writer, report)?;

    debug!("记录已写入: {}", image_path.display());
    Ok(())
  }
}

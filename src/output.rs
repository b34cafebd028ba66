// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/output.rs - 结果输出
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, checkout::Report, frame::Frame};

pub trait Render {
  type Error;
  fn render_result(&self, frame: &Frame, report: &Report) -> Result<(), Self::Error>;

  /// 清空当前显示，进入下一个购物篮时调用
  fn clear(&self) -> Result<(), Self::Error> {
    Ok(())
  }
}

pub mod draw;
use self::draw::Draw;

mod console;
pub use self::console::{ConsoleOutput, format_report};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputWrapper {
  /// 替换绘制方式（例如加载了标签字体之后）
  pub fn with_draw(self, draw: Draw) -> Self {
    match self {
      OutputWrapper::Console(output) => OutputWrapper::Console(output),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        OutputWrapper::SaveImageFileOutput(output.with_draw(draw))
      }
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        OutputWrapper::DirectoryRecordOutput(output.with_draw(draw))
      }
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, report: &Report) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.render_result(frame, report),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, report)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, report)
        .map_err(OutputError::from),
    }
  }

  fn clear(&self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.clear(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.clear().map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.clear().map_err(OutputError::from),
    }
  }
}

/// 同时输出到多个目标，按顺序执行，遇到第一个错误即返回
impl<R: Render> Render for Vec<R> {
  type Error = R::Error;

  fn render_result(&self, frame: &Frame, report: &Report) -> Result<(), Self::Error> {
    self
      .iter()
      .try_for_each(|output| output.render_result(frame, report))
  }

  fn clear(&self) -> Result<(), Self::Error> {
    self.iter().try_for_each(|output| output.clear())
  }
}

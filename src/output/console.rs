// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/output/console.rs - 终端结账清单输出
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

use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  checkout::Report,
  frame::Frame,
  output::{OutputError, Render},
};

/// 把结账清单打印到标准输出
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(ConsoleOutput)
  }
}

pub fn format_report(report: &Report) -> String {
  let rows = report.checkout.table_rows();
  let name_width = rows.iter().map(|(name, _)| name.chars().count()).max().unwrap_or(0);

  rows
    .iter()
    .map(|(name, price)| format!("{:<width$}  {}", name, price, width = name_width))
    .chain(std::iter::once(format!("Inference Time: {} ms", report.elapsed_ms)))
    .collect::<Vec<_>>()
    .join("\n")
}

impl Render for ConsoleOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, report: &Report) -> Result<(), Self::Error> {
    println!("== 第 {} 帧 ({}x{}) ==", frame.index(), frame.width(), frame.height());
    for detection in &report.detections {
      println!("  - {}", detection.label());
    }
    println!("{}", format_report(report));
    println!();
    Ok(())
  }

  fn clear(&self) -> Result<(), Self::Error> {
    println!("== 下一个购物篮 ==");
    Ok(())
  }
}

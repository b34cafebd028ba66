// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use shopping_basket::{input::TransportKind, model::UpperBound};

/// Shopping Basket 交互式结账演示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型文件路径 (ONNX)
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入来源，留空时自动选择摄像头
  /// 支持格式:
  /// - V4L2: /dev/video0 或 v4l:///dev/video0
  /// - 图片: 图片文件、图片目录或 image:///path
  #[arg(long, value_name = "SOURCE", default_value = "")]
  pub input: String,

  /// 输出目标，可重复指定
  /// 支持格式: console://, image:///out.png, folder:///dir?always
  #[arg(long, value_name = "OUTPUT", default_value = "console://")]
  pub output: Vec<Url>,

  /// 价目表 JSON 文件，缺省时使用内置价目表
  #[arg(long, value_name = "FILE")]
  pub catalog: Option<PathBuf>,

  /// 标签字体 (TTF/OTF)，缺省时只绘制检测框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 推理线程数
  #[arg(long, default_value = "2", value_name = "N")]
  pub threads: usize,

  /// 关闭推理加速
  #[arg(long)]
  pub no_acceleration: bool,

  /// 摄像头接入方式 (mipi, usb, file)，缺省时根据来源猜测
  #[arg(long, value_name = "KIND")]
  pub transport: Option<TransportKind>,

  /// 单次拍摄读取的帧数，覆盖接入方式的默认值
  #[arg(long, value_name = "N")]
  pub settle: Option<u32>,

  /// 连续模式两帧之间的间隔（毫秒）
  #[arg(long, default_value = "0", value_name = "MS")]
  pub frame_delay: u64,

  /// 置信度上界 (inclusive: score <= 1.0, exclusive: score < 1.0)
  #[arg(long, default_value = "inclusive", value_name = "BOUND")]
  pub upper_bound: UpperBound,

  /// 启动后立即进入连续模式
  #[arg(long)]
  pub continuous: bool,
}

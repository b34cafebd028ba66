// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续检测
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

use std::{path::PathBuf, process, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use url::Url;

use shopping_basket::{
  FromUrl,
  catalog::Catalog,
  controller::{Controller, ControllerConfig, ControllerError, EXIT_CAMERA_INIT, EXIT_MODEL},
  input::{CameraConfig, open_camera},
  model::{BackendOptions, ConfidenceFilter, DetectorConfig, ModelSlot, OnnxLoader},
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

/// 连续拍摄并检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型文件路径 (ONNX)
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE", default_value = "")]
  pub input: String,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "console://")]
  pub output: Url,
  /// 价目表 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub catalog: Option<PathBuf>,
  /// 推理线程数
  #[arg(long, default_value = "2", value_name = "N")]
  pub threads: usize,
  /// 两帧之间的间隔（毫秒）
  #[arg(long, default_value = "0", value_name = "MS")]
  pub frame_delay: u64,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {:?}", args.input);
  info!("输出路径: {}", args.output);

  let catalog = match &args.catalog {
    Some(path) => Catalog::from_json_file(path)?,
    None => Catalog::default(),
  };
  let output = OutputWrapper::from_url(&args.output)?;
  let camera = match open_camera(&args.input, None, CameraConfig::default()) {
    Ok(camera) => camera,
    Err(e) => {
      error!("无法打开摄像头: {}", e);
      process::exit(EXIT_CAMERA_INIT);
    }
  };

  let mut slot = ModelSlot::new(OnnxLoader, DetectorConfig {
    backend: BackendOptions {
      model_path: args.model,
      use_acceleration: true,
      threads: args.threads,
    },
    filter: ConfidenceFilter::default(),
  });
  if let Err(e) = slot.load() {
    error!("无法加载模型: {}", e);
    process::exit(EXIT_MODEL);
  }

  let controller = Controller::new(camera, slot, catalog, output, ControllerConfig {
    settle_iterations: None,
    frame_delay: Duration::from_millis(args.frame_delay),
  })?;

  if let Err(e) = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(controller)
  {
    if let Some(code) = e.downcast_ref::<ControllerError>().and_then(ControllerError::exit_code) {
      error!("{}", e);
      process::exit(code);
    }
    return Err(e);
  }

  Ok(())
}

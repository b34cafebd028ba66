// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/main.rs - 交互式结账演示
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

mod args;

use std::{process, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use shopping_basket::{
  FromUrl,
  catalog::Catalog,
  controller::{Controller, ControllerConfig, ControllerError, EXIT_CAMERA_INIT, EXIT_MODEL},
  input::{CameraConfig, open_camera},
  model::{BackendOptions, ConfidenceFilter, DetectorConfig, ModelSlot, OnnxLoader},
  output::{OutputWrapper, draw::Draw},
  task::{InteractiveTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {:?}", args.input);
  info!("推理线程数: {}", args.threads);
  info!("推理加速: {}", !args.no_acceleration);

  let catalog = match &args.catalog {
    Some(path) => Catalog::from_json_file(path)?,
    None => Catalog::default(),
  };

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let output = args
    .output
    .iter()
    .map(|url| OutputWrapper::from_url(url).map(|output| output.with_draw(draw.clone())))
    .collect::<Result<Vec<_>, _>>()?;

  let camera = match open_camera(&args.input, args.transport, CameraConfig::default()) {
    Ok(camera) => camera,
    Err(e) => {
      error!("无法打开摄像头: {}", e);
      process::exit(EXIT_CAMERA_INIT);
    }
  };

  let mut slot = ModelSlot::new(OnnxLoader, DetectorConfig {
    backend: BackendOptions {
      model_path: args.model.clone(),
      use_acceleration: !args.no_acceleration,
      threads: args.threads,
    },
    filter: ConfidenceFilter::default().with_upper(args.upper_bound),
  });
  if let Err(e) = slot.load() {
    error!("无法加载模型: {}", e);
    process::exit(EXIT_MODEL);
  }

  let controller = Controller::new(camera, slot, catalog, output, ControllerConfig {
    settle_iterations: args.settle,
    frame_delay: Duration::from_millis(args.frame_delay),
  })?;

  if let Err(e) = InteractiveTask::default()
    .with_continuous(args.continuous)
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

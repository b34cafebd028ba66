// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/task.rs - 任务
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

use std::{io::BufRead, thread};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{info, warn};

use crate::{
  controller::{Command, Controller, ControllerError},
  output::{OutputError, Render},
};

pub trait Task<O>: Sized {
  type Error;
  fn run_task(self, controller: Controller<O>) -> Result<(), Self::Error>;
}

/// 处理一个购物篮后退出
pub struct OneShotTask;

impl<O: Render<Error = OutputError>> Task<O> for OneShotTask {
  type Error = anyhow::Error;

  fn run_task(self, mut controller: Controller<O>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let report = controller.process_basket()?;
    info!(
      "处理完成: {} 件商品，总价 {}{}，推理耗时 {} ms",
      report.checkout.rows().len(),
      report.checkout.currency(),
      report.checkout.total(),
      report.elapsed_ms
    );
    Ok(())
  }
}

/// 连续处理帧，直到达到指定帧数或收到中断信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<O: Render<Error = OutputError>> Task<O> for ContinuousTask {
  type Error = anyhow::Error;

  fn run_task(self, mut controller: Controller<O>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (stop, stopped) = unbounded::<()>();
    {
      let stop = stop.clone();
      if let Err(e) = ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = stop.send(());
      }) {
        warn!("无法设置 Ctrl-C 处理函数: {}", e);
      }
    }

    let delay = controller.frame_delay();
    let mut frame_index = 0usize;
    loop {
      match controller.run_cycle() {
        Ok(report) => {
          frame_index += 1;
          info!("第 {} 帧处理完成，耗时 {} ms", frame_index, report.elapsed_ms);
        }
        Err(e @ ControllerError::CaptureDisabled) => return Err(e.into()),
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => warn!("本帧处理失败: {}", e),
      }

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }

      // 帧间隔期间也能响应中断
      let interrupted = if delay.is_zero() {
        stopped.try_recv().is_ok()
      } else {
        stopped.recv_timeout(delay).is_ok()
      };
      if interrupted {
        break;
      }
    }
    drop(stop);

    info!("任务完成，退出");
    Ok(())
  }
}

/// 命令驱动的交互任务
///
/// 默认从标准输入逐行读取命令，Ctrl-C 等同于 `q`。
#[derive(Default)]
pub struct InteractiveTask {
  start_continuous: bool,
  commands: Option<(Sender<Command>, Receiver<Command>)>,
}

impl InteractiveTask {
  pub fn with_continuous(mut self, start_continuous: bool) -> Self {
    self.start_continuous = start_continuous;
    self
  }

  /// 使用外部命令通道代替标准输入
  pub fn with_commands(mut self, sender: Sender<Command>, receiver: Receiver<Command>) -> Self {
    self.commands = Some((sender, receiver));
    self
  }
}

fn spawn_stdin_reader(sender: Sender<Command>) {
  let spawned = thread::Builder::new()
    .name("stdin".to_string())
    .spawn(move || {
      let stdin = std::io::stdin();
      for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
          continue;
        }
        match line.parse::<Command>() {
          Ok(command) => {
            if sender.send(command).is_err() {
              return;
            }
          }
          Err(e) => warn!("{}", e),
        }
      }
      let _ = sender.send(Command::Quit);
    });
  if let Err(e) = spawned {
    warn!("无法启动标准输入线程: {}", e);
  }
}

fn print_help() {
  println!("命令: c 连续模式 | s 停止 | p 处理购物篮 | n 下一个购物篮 | t N 线程数 | a 切换加速 | q 退出");
}

impl<O: Render<Error = OutputError>> Task<O> for InteractiveTask {
  type Error = anyhow::Error;

  fn run_task(self, mut controller: Controller<O>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (sender, receiver) = match self.commands {
      Some(channel) => channel,
      None => {
        let (sender, receiver) = unbounded();
        spawn_stdin_reader(sender.clone());
        print_help();
        (sender, receiver)
      }
    };

    let interrupt = sender.clone();
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = interrupt.send(Command::Quit);
    }) {
      warn!("无法设置 Ctrl-C 处理函数: {}", e);
    }
    drop(sender);

    if self.start_continuous {
      controller.start_continuous()?;
    }
    controller.run(&receiver)?;

    info!("任务完成，退出");
    Ok(())
  }
}

// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/worker.rs - 单请求工作线程
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

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("无法创建工作线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("工作线程 {0} 已退出")]
  Disconnected(String),
  #[error("工作线程 {0} 返回了不匹配的响应")]
  UnexpectedReply(String),
}

/// 带序号的消息
#[derive(Debug)]
pub struct Envelope<T> {
  pub seq: u64,
  pub body: T,
}

/// 独占一份状态的工作线程，同一时刻最多处理一个请求
///
/// 请求与响应通道容量均为 1。[`Worker::submit`] 返回的 [`Ticket`] 借用了 worker，
/// 在它被消费之前无法提交下一个请求；被丢弃的请求，其响应在下一次提交前收回。
pub struct Worker<Req, Resp> {
  name: String,
  requests: Option<Sender<Envelope<Req>>>,
  responses: Receiver<Envelope<Resp>>,
  next_seq: u64,
  // 已提交但响应尚未取走的请求
  unanswered: Option<u64>,
  handle: Option<JoinHandle<()>>,
}

impl<Req: Send + 'static, Resp: Send + 'static> Worker<Req, Resp> {
  pub fn spawn<S, F>(name: impl Into<String>, mut state: S, mut handler: F) -> Result<Self, WorkerError>
  where
    S: Send + 'static,
    F: FnMut(&mut S, Req) -> Resp + Send + 'static,
  {
    let name = name.into();
    let (req_tx, req_rx) = bounded::<Envelope<Req>>(1);
    let (resp_tx, resp_rx) = bounded::<Envelope<Resp>>(1);

    let thread_name = name.clone();
    let handle = thread::Builder::new().name(name.clone()).spawn(move || {
      debug!("工作线程 {} 已启动", thread_name);
      for Envelope { seq, body } in req_rx.iter() {
        let body = handler(&mut state, body);
        if resp_tx.send(Envelope { seq, body }).is_err() {
          break;
        }
      }
      debug!("工作线程 {} 退出", thread_name);
    })?;

    Ok(Self {
      name,
      requests: Some(req_tx),
      responses: resp_rx,
      next_seq: 0,
      unanswered: None,
      handle: Some(handle),
    })
  }
}

impl<Req, Resp> Worker<Req, Resp> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn submit(&mut self, request: Req) -> Result<Ticket<'_, Req, Resp>, WorkerError> {
    if let Some(stale) = self.unanswered.take() {
      self.discard_until(stale)?;
    }

    let seq = self.next_seq;
    self.next_seq += 1;

    let requests = self
      .requests
      .as_ref()
      .ok_or_else(|| WorkerError::Disconnected(self.name.clone()))?;
    requests
      .send(Envelope { seq, body: request })
      .map_err(|_| WorkerError::Disconnected(self.name.clone()))?;

    self.unanswered = Some(seq);
    Ok(Ticket { worker: self, seq })
  }

  fn discard_until(&self, stale: u64) -> Result<(), WorkerError> {
    loop {
      let envelope = self
        .responses
        .recv()
        .map_err(|_| WorkerError::Disconnected(self.name.clone()))?;
      debug!("{}: 丢弃未等待的响应 #{}", self.name, envelope.seq);
      if envelope.seq >= stale {
        return Ok(());
      }
    }
  }

  fn accept(&self, envelope: Envelope<Resp>, seq: u64) -> Option<Resp> {
    if envelope.seq == seq {
      Some(envelope.body)
    } else {
      debug!("{}: 丢弃过期的响应 #{} (等待 #{})", self.name, envelope.seq, seq);
      None
    }
  }
}

impl<Req, Resp> Drop for Worker<Req, Resp> {
  fn drop(&mut self) {
    // 关闭请求通道后排空响应，避免工作线程阻塞在发送上
    self.requests.take();
    for envelope in self.responses.iter() {
      debug!("{}: 退出时丢弃响应 #{}", self.name, envelope.seq);
    }
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("工作线程 {} 异常退出", self.name);
    }
  }
}

/// 一个尚未完成的请求
#[must_use = "未等待的请求结果会在下一次提交时被丢弃"]
pub struct Ticket<'a, Req, Resp> {
  worker: &'a mut Worker<Req, Resp>,
  seq: u64,
}

impl<Req, Resp> Ticket<'_, Req, Resp> {
  pub fn seq(&self) -> u64 {
    self.seq
  }

  /// 阻塞直到对应序号的响应到达
  pub fn wait(self) -> Result<Resp, WorkerError> {
    loop {
      let envelope = self
        .worker
        .responses
        .recv()
        .map_err(|_| WorkerError::Disconnected(self.worker.name.clone()))?;
      if let Some(body) = self.worker.accept(envelope, self.seq) {
        self.worker.unanswered = None;
        return Ok(body);
      }
    }
  }

  /// 等待响应的同时接收命令，每条命令交给 `on_command`
  pub fn wait_with<C>(
    self,
    commands: &Receiver<C>,
    mut on_command: impl FnMut(C),
  ) -> Result<Resp, WorkerError> {
    let mut commands_open = true;
    while commands_open {
      select! {
        recv(self.worker.responses) -> envelope => {
          let envelope = envelope.map_err(|_| WorkerError::Disconnected(self.worker.name.clone()))?;
          if let Some(body) = self.worker.accept(envelope, self.seq) {
            self.worker.unanswered = None;
            return Ok(body);
          }
        }
        recv(commands) -> command => match command {
          Ok(command) => on_command(command),
          Err(_) => commands_open = false,
        },
      }
    }
    self.wait()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use crossbeam_channel::unbounded;

  use super::*;

  fn doubler() -> Worker<u32, u32> {
    Worker::spawn("doubler", 0usize, |count: &mut usize, n: u32| {
      *count += 1;
      n * 2
    })
    .unwrap()
  }

  #[test]
  fn responses_are_paired_with_requests() {
    let mut worker = doubler();
    assert_eq!(worker.submit(3).unwrap().wait().unwrap(), 6);
    assert_eq!(worker.submit(5).unwrap().wait().unwrap(), 10);
  }

  #[test]
  fn abandoned_response_is_discarded() {
    let mut worker = doubler();
    let ticket = worker.submit(1).unwrap();
    assert_eq!(ticket.seq(), 0);
    drop(ticket);

    let ticket = worker.submit(7).unwrap();
    assert_eq!(ticket.seq(), 1);
    assert_eq!(ticket.wait().unwrap(), 14);
  }

  #[test]
  fn repeatedly_abandoned_tickets_do_not_block() {
    let mut worker = doubler();
    for n in 0..3 {
      drop(worker.submit(n).unwrap());
    }
    assert_eq!(worker.submit(21).unwrap().wait().unwrap(), 42);
    assert_eq!(worker.submit(4).unwrap().wait().unwrap(), 8);
  }

  #[test]
  fn state_is_kept_between_requests() {
    let mut worker = Worker::spawn("counter", 0u32, |count: &mut u32, ()| {
      *count += 1;
      *count
    })
    .unwrap();
    worker.submit(()).unwrap().wait().unwrap();
    assert_eq!(worker.submit(()).unwrap().wait().unwrap(), 2);
  }

  #[test]
  fn commands_are_delivered_while_waiting() {
    let mut worker = Worker::spawn("slow", (), |_: &mut (), n: u32| {
      thread::sleep(Duration::from_millis(50));
      n + 1
    })
    .unwrap();
    let (tx, rx) = unbounded();
    tx.send("stop").unwrap();

    let mut received = Vec::new();
    let result = worker
      .submit(1)
      .unwrap()
      .wait_with(&rx, |command| received.push(command))
      .unwrap();
    assert_eq!(result, 2);
    assert_eq!(received, vec!["stop"]);
  }

  #[test]
  fn closed_command_channel_falls_back_to_wait() {
    let mut worker = doubler();
    let (tx, rx) = unbounded::<()>();
    drop(tx);
    assert_eq!(worker.submit(4).unwrap().wait_with(&rx, |_| {}).unwrap(), 8);
  }

  #[test]
  fn panicked_worker_is_disconnected() {
    let mut worker = Worker::spawn("panics", (), |_: &mut (), _: u32| -> u32 { panic!("boom") }).unwrap();
    let result = worker.submit(1).and_then(|ticket| ticket.wait());
    assert!(matches!(result, Err(WorkerError::Disconnected(_))));
  }
}

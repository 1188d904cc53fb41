// 该文件是 Qiepian （切片） 项目的一部分。
// src/pool/worker.rs - 工作线程主循环
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
  any::Any,
  collections::VecDeque,
  panic::{AssertUnwindSafe, catch_unwind},
  path::PathBuf,
  sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  config::DetectConfig,
  detection::Detection,
  input::{InputError, load_image},
  model::{BuildDetector, Detector},
  output::{OutputError, PoolOutput, Render},
  pool::ResultsMap,
  quiet::QuietScope,
  tile::{TileError, TiledDetector},
};

/// 空闲时等待唤醒的最长时间，超时后重新检查停止标志
pub(crate) const WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// 忽略锁中毒：持锁的一方只做入队、出队和插入，数据不会处于中间状态
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) enum Job {
  File(PathBuf),
  Memory { name: String, image: RgbImage },
}

impl Job {
  pub(crate) fn identifier(&self) -> String {
    match self {
      Job::File(path) => path.to_string_lossy().into_owned(),
      Job::Memory { name, .. } => name.clone(),
    }
  }
}

/// 待处理队列，内存图像优先于文件
#[derive(Default)]
pub(crate) struct Pending {
  pub(crate) images: VecDeque<(String, RgbImage)>,
  pub(crate) files: VecDeque<PathBuf>,
}

impl Pending {
  pub(crate) fn len(&self) -> usize {
    self.images.len() + self.files.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.images.is_empty() && self.files.is_empty()
  }

  pub(crate) fn pop(&mut self) -> Option<Job> {
    if let Some((name, image)) = self.images.pop_front() {
      return Some(Job::Memory { name, image });
    }
    self.files.pop_front().map(Job::File)
  }

  pub(crate) fn clear(&mut self) {
    self.images.clear();
    self.files.clear();
  }
}

/// 池与工作线程共享的状态
///
/// `processing` 只在持有 `pending` 锁时增减，等待方据此判断是否全部完成。
#[derive(Default)]
pub(crate) struct Shared {
  pub(crate) pending: Mutex<Pending>,
  pub(crate) trigger: Condvar,
  pub(crate) results: Mutex<ResultsMap>,
  pub(crate) stop: AtomicBool,
  pub(crate) processing: AtomicUsize,
  pub(crate) ready: AtomicUsize,
}

impl Shared {
  pub(crate) fn stopping(&self) -> bool {
    self.stop.load(Ordering::SeqCst)
  }

  /// 待处理与处理中的任务总数
  pub(crate) fn remaining(&self, pending: &Pending) -> usize {
    pending.len() + self.processing.load(Ordering::SeqCst)
  }

  fn wait<'a>(&self, guard: MutexGuard<'a, Pending>) -> MutexGuard<'a, Pending> {
    match self.trigger.wait_timeout(guard, WAIT_INTERVAL) {
      Ok((guard, _)) => guard,
      Err(poisoned) => poisoned.into_inner().0,
    }
  }

  /// 等到队列清空且没有任务在处理，或停止，或 `give_up` 返回真
  pub(crate) fn wait_until_idle(&self, give_up: impl Fn() -> bool) {
    let mut pending = lock(&self.pending);
    while !self.stopping() && self.remaining(&pending) > 0 {
      if give_up() {
        break;
      }
      pending = self.wait(pending);
    }
  }
}

#[derive(Error, Debug)]
enum JobError<E: std::error::Error + 'static> {
  #[error("读取输入失败: {0}")]
  Input(#[from] InputError),
  #[error("推理失败: {0}")]
  Detect(#[from] TileError<E>),
  #[error("写出结果失败: {0}")]
  Output(#[from] OutputError),
  #[error("删除源文件失败: {0}")]
  Delete(#[source] std::io::Error),
}

pub(crate) struct Worker<B: BuildDetector> {
  pub(crate) id: usize,
  pub(crate) builder: Arc<B>,
  pub(crate) shared: Arc<Shared>,
  pub(crate) config: Arc<DetectConfig>,
  pub(crate) output: Arc<PoolOutput>,
}

/// 离开作用域时把处理中计数减一并唤醒等待方，推理崩溃时同样生效
struct InFlight<'a> {
  shared: &'a Shared,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    {
      let _pending = lock(&self.shared.pending);
      self.shared.processing.fetch_sub(1, Ordering::SeqCst);
    }
    self.shared.trigger.notify_all();
  }
}

/// 已加载检测器的工作线程计数，线程以任何方式退出都会减一
struct Loaded<'a> {
  shared: &'a Shared,
}

impl<'a> Loaded<'a> {
  fn enter(shared: &'a Shared) -> Self {
    shared.ready.fetch_add(1, Ordering::SeqCst);
    Self { shared }
  }
}

impl Drop for Loaded<'_> {
  fn drop(&mut self) {
    self.shared.ready.fetch_sub(1, Ordering::SeqCst);
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知错误".to_string()
  }
}

impl<B: BuildDetector> Worker<B> {
  pub(crate) fn run(self) {
    let built = catch_unwind(AssertUnwindSafe(|| {
      let _quiet = QuietScope::enter(self.config.quiet_load);
      self.builder.build()
    }));
    let detector = match built {
      Ok(Ok(detector)) => detector,
      Ok(Err(e)) => {
        error!("工作线程 {} 加载检测器失败: {}", self.id, e);
        return;
      }
      Err(payload) => {
        error!(
          "工作线程 {} 加载检测器时崩溃: {}",
          self.id,
          panic_message(payload.as_ref())
        );
        return;
      }
    };

    let mut detector = TiledDetector::new(detector, DetectConfig::clone(&self.config));
    let _loaded = Loaded::enter(&self.shared);
    info!("工作线程 {} 已就绪", self.id);

    while let Some(job) = self.next_job() {
      let _in_flight = InFlight {
        shared: &self.shared,
      };
      let identifier = job.identifier();
      let started = Instant::now();

      match catch_unwind(AssertUnwindSafe(|| self.process(&mut detector, job))) {
        Ok(Ok(detections)) => {
          debug!(
            "工作线程 {} 完成 {}: {} 个目标，耗时 {:.2?}",
            self.id,
            identifier,
            detections.len(),
            started.elapsed()
          );
          lock(&self.shared.results).insert(identifier, detections);
        }
        Ok(Err(e)) => error!("工作线程 {} 处理 {} 失败: {}", self.id, identifier, e),
        Err(payload) => error!(
          "工作线程 {} 处理 {} 时崩溃: {}",
          self.id,
          identifier,
          panic_message(payload.as_ref())
        ),
      }
    }

    info!("工作线程 {} 退出", self.id);
  }

  /// 阻塞取下一个任务；停止时返回 `None`
  fn next_job(&self) -> Option<Job> {
    let mut pending = lock(&self.shared.pending);
    loop {
      if self.shared.stopping() {
        return None;
      }

      if let Some(job) = pending.pop() {
        self.shared.processing.fetch_add(1, Ordering::SeqCst);
        if !pending.is_empty() {
          // 让其他线程接着处理剩下的任务
          self.shared.trigger.notify_all();
        }
        return Some(job);
      }

      pending = self.shared.wait(pending);
    }
  }

  fn process<D: Detector>(
    &self,
    detector: &mut TiledDetector<D>,
    job: Job,
  ) -> Result<Vec<Detection>, JobError<D::Error>> {
    let identifier = job.identifier();
    let (image, source) = match job {
      Job::File(path) => (load_image(&path)?, Some(path)),
      Job::Memory { image, .. } => (image, None),
    };

    let detections = detector.predict(&image)?;
    self
      .output
      .render_result(&identifier, &image, &detections)?;

    if let Some(path) = source.filter(|_| self.output.delete_input) {
      std::fs::remove_file(&path).map_err(JobError::Delete)?;
      debug!("已删除源文件 {}", path.display());
    }

    Ok(detections)
  }
}

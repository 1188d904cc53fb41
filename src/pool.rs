// 该文件是 Qiepian （切片） 项目的一部分。
// src/pool.rs - 多线程批量推理池
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
  collections::BTreeMap,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  thread::{self, JoinHandle},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::DetectConfig,
  detection::Detection,
  input::{InputError, collect_image_files},
  model::{
    BuildDetector,
    cfg_edit::{CfgEditError, force_single_batch},
  },
  output::{OutputError, PoolOutput},
};

mod worker;

use self::worker::{Shared, Worker, lock};

/// 工作线程数量上限
pub const MAX_WORKERS: usize = 32;

/// 输入标识到检测结果；文件以规范路径为键，内存图像以 `image_<n>` 为键
pub type ResultsMap = BTreeMap<String, Vec<Detection>>;

#[derive(Error, Debug)]
pub enum PoolError {
  #[error("工作线程数量 {0} 无效，应在 1 到 32 之间")]
  InvalidWorkerCount(usize),
  #[error("推理池尚未初始化")]
  NotInitialized,
  #[error("输入图像为空")]
  EmptyImage,
  #[error("输出目录错误: {0}")]
  Output(#[from] OutputError),
  #[error("网络定义修改失败: {0}")]
  ModelDefinition(#[from] CfgEditError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("无法启动工作线程: {0}")]
  Spawn(#[from] std::io::Error),
}

struct Settings {
  workers: usize,
  config: Arc<DetectConfig>,
  output: Arc<PoolOutput>,
}

/// 每个工作线程独占一个检测器，共享同一个任务队列
///
/// 检测器在工作线程内部由 `B` 构造，也在该线程退出时释放。
pub struct WorkerPool<B: BuildDetector> {
  builder: Arc<B>,
  shared: Arc<Shared>,
  settings: Option<Settings>,
  handles: Vec<JoinHandle<()>>,
  image_index: AtomicUsize,
}

impl<B: BuildDetector> WorkerPool<B> {
  pub fn new(builder: B) -> Self {
    Self {
      builder: Arc::new(builder),
      shared: Arc::new(Shared::default()),
      settings: None,
      handles: Vec::new(),
      image_index: AtomicUsize::new(0),
    }
  }

  /// 校验参数、准备输出目录，然后启动工作线程
  ///
  /// 网络定义文件的修改只在这里做一次，此时还没有任何工作线程。
  pub fn init(
    &mut self,
    config: DetectConfig,
    workers: usize,
    mut output: PoolOutput,
  ) -> Result<(), PoolError> {
    self.stop();

    if !(1..=MAX_WORKERS).contains(&workers) {
      return Err(PoolError::InvalidWorkerCount(workers));
    }

    output.prepare()?;
    if config.modify_batch_and_subdivisions {
      if let Some(path) = &config.model_definition {
        let changed = force_single_batch(path)?;
        debug!("网络定义 {} 修改了 {} 行", path.display(), changed);
      }
    }

    info!(
      "初始化推理池: {} 个工作线程，输出目录 {}",
      workers,
      output.directory.display()
    );
    self.settings = Some(Settings {
      workers,
      config: Arc::new(config),
      output: Arc::new(output),
    });
    self.restart()
  }

  /// 停止现有工作线程并按原配置重新启动
  pub fn restart(&mut self) -> Result<(), PoolError> {
    self.stop();
    let (workers, config, output) = match &self.settings {
      Some(settings) => (
        settings.workers,
        Arc::clone(&settings.config),
        Arc::clone(&settings.output),
      ),
      None => return Err(PoolError::NotInitialized),
    };

    self.shared.stop.store(false, Ordering::SeqCst);
    for id in 0..workers {
      let worker = Worker {
        id,
        builder: Arc::clone(&self.builder),
        shared: Arc::clone(&self.shared),
        config: Arc::clone(&config),
        output: Arc::clone(&output),
      };
      let handle = thread::Builder::new()
        .name(format!("qiepian-worker-{}", id))
        .spawn(move || worker.run());
      match handle {
        Ok(handle) => self.handles.push(handle),
        Err(e) => {
          self.stop();
          return Err(PoolError::Spawn(e));
        }
      }
    }
    Ok(())
  }

  /// 通知所有工作线程退出并等待，然后清空队列与结果
  ///
  /// 正在进行的推理不会被打断。
  pub fn stop(&mut self) {
    {
      let _pending = lock(&self.shared.pending);
      self.shared.stop.store(true, Ordering::SeqCst);
    }
    self.shared.trigger.notify_all();

    let count = self.handles.len();
    for handle in self.handles.drain(..) {
      if handle.join().is_err() {
        warn!("工作线程异常退出");
      }
    }
    if count > 0 {
      debug!("已停止 {} 个工作线程", count);
    }

    lock(&self.shared.pending).clear();
    lock(&self.shared.results).clear();
    self.shared.processing.store(0, Ordering::SeqCst);
    self.image_index.store(0, Ordering::SeqCst);
  }

  fn ensure_initialized(&self) -> Result<(), PoolError> {
    match self.settings {
      Some(_) => Ok(()),
      None => Err(PoolError::NotInitialized),
    }
  }

  /// 加入一个文件，或递归加入目录下的全部图像，返回加入的数量
  pub fn add_images<P: AsRef<Path>>(&self, path: P) -> Result<usize, PoolError> {
    self.ensure_initialized()?;
    let files = collect_image_files(path)?;
    let count = files.len();

    for file in files {
      lock(&self.shared.pending).files.push_back(file);
      self.shared.trigger.notify_all();
    }

    debug!("加入 {} 个文件", count);
    Ok(count)
  }

  /// 加入一张内存图像，返回生成的标识 `image_<n>`
  pub fn add_image(&self, image: RgbImage) -> Result<String, PoolError> {
    self.ensure_initialized()?;
    if image.width() == 0 || image.height() == 0 {
      return Err(PoolError::EmptyImage);
    }

    let name = format!("image_{}", self.image_index.fetch_add(1, Ordering::SeqCst));
    lock(&self.shared.pending)
      .images
      .push_back((name.clone(), image));
    self.shared.trigger.notify_all();
    Ok(name)
  }

  pub fn reset_image_index(&self) {
    self.image_index.store(0, Ordering::SeqCst);
  }

  /// 清空待处理队列，等正在处理的任务结束并丢弃全部结果
  pub fn purge(&self) -> Result<(), PoolError> {
    self.ensure_initialized()?;
    let dropped = {
      let mut pending = lock(&self.shared.pending);
      let dropped = pending.len();
      pending.clear();
      dropped
    };
    self.image_index.store(0, Ordering::SeqCst);

    let discarded = self.wait_for_results()?;
    debug!("清空 {} 个待处理任务，丢弃 {} 个结果", dropped, discarded.len());
    Ok(())
  }

  /// 阻塞直到所有任务完成，然后取走全部结果
  ///
  /// 所有工作线程都已退出时不再等待，剩余任务保留在队列中。
  pub fn wait_for_results(&self) -> Result<ResultsMap, PoolError> {
    self.ensure_initialized()?;
    self.shared.wait_until_idle(|| {
      let abandoned = self.handles.iter().all(|handle| handle.is_finished());
      if abandoned {
        warn!("没有可用的工作线程，放弃等待");
      }
      abandoned
    });
    Ok(self.get_results())
  }

  /// 不等待，取走目前已有的结果
  pub fn get_results(&self) -> ResultsMap {
    std::mem::take(&mut *lock(&self.shared.results))
  }

  /// 待处理与正在处理的任务数量
  pub fn files_remaining(&self) -> usize {
    self.shared.remaining(&lock(&self.shared.pending))
  }

  /// 成功加载检测器、仍在运行的工作线程数量
  pub fn networks_loaded(&self) -> usize {
    self.shared.ready.load(Ordering::SeqCst)
  }

  pub fn worker_count(&self) -> usize {
    self.handles.len()
  }

  pub fn output(&self) -> Option<&PoolOutput> {
    self.settings.as_ref().map(|settings| settings.output.as_ref())
  }
}

impl<B: BuildDetector> Drop for WorkerPool<B> {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Detector, Inference, RawDetection};
  use std::time::Duration;

  struct Echo;

  impl Detector for Echo {
    type Error = std::io::Error;

    fn input_size(&self) -> (u32, u32) {
      (64, 64)
    }

    fn infer(&mut self, image: &RgbImage, _threshold: f32) -> Result<Inference, Self::Error> {
      // 图像宽度决定目标数量
      let items = (0..image.width().min(3))
        .map(|_| RawDetection {
          center: [0.5, 0.5],
          size: [0.5, 0.5],
          probabilities: vec![0.9].into_boxed_slice(),
        })
        .collect::<Vec<_>>();
      Ok(Inference {
        items: items.into_boxed_slice(),
        elapsed: Duration::ZERO,
      })
    }
  }

  struct EchoBuilder;

  impl BuildDetector for EchoBuilder {
    type Detector = Echo;
    type Error = std::io::Error;

    fn build(&self) -> Result<Echo, std::io::Error> {
      Ok(Echo)
    }
  }

  fn output_dir(name: &str) -> PoolOutput {
    PoolOutput::new(std::env::temp_dir().join(format!("qiepian-pool-{}-{}", name, std::process::id())))
  }

  #[test]
  fn uninitialized_pool_refuses_work() {
    let pool = WorkerPool::new(EchoBuilder);
    assert!(matches!(pool.add_images("."), Err(PoolError::NotInitialized)));
    assert!(matches!(pool.add_image(RgbImage::new(2, 2)), Err(PoolError::NotInitialized)));
    assert!(matches!(pool.wait_for_results(), Err(PoolError::NotInitialized)));
    assert!(matches!(pool.purge(), Err(PoolError::NotInitialized)));
    assert_eq!(pool.files_remaining(), 0);
  }

  #[test]
  fn memory_images_get_sequential_names() {
    let mut pool = WorkerPool::new(EchoBuilder);
    pool.init(DetectConfig::default(), 2, output_dir("memory")).unwrap();

    assert_eq!(pool.add_image(RgbImage::new(1, 4)).unwrap(), "image_0");
    assert_eq!(pool.add_image(RgbImage::new(2, 4)).unwrap(), "image_1");
    assert!(matches!(pool.add_image(RgbImage::new(0, 4)), Err(PoolError::EmptyImage)));

    let results = pool.wait_for_results().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results["image_0"].len(), 1);
    assert_eq!(results["image_1"].len(), 2);
    assert!(pool.get_results().is_empty());

    pool.reset_image_index();
    assert_eq!(pool.add_image(RgbImage::new(1, 1)).unwrap(), "image_0");
    pool.wait_for_results().unwrap();

    let dir = pool.output().unwrap().directory.clone();
    pool.stop();
    std::fs::remove_dir_all(dir).unwrap();
  }

  #[test]
  fn restart_keeps_configuration() {
    let mut pool = WorkerPool::new(EchoBuilder);
    assert!(matches!(pool.restart(), Err(PoolError::NotInitialized)));

    pool.init(DetectConfig::default(), 3, output_dir("restart")).unwrap();
    assert_eq!(pool.worker_count(), 3);
    pool.restart().unwrap();
    assert_eq!(pool.worker_count(), 3);

    pool.stop();
    assert_eq!(pool.worker_count(), 0);
    assert_eq!(pool.networks_loaded(), 0);

    let dir = pool.output().unwrap().directory.clone();
    std::fs::remove_dir_all(dir).unwrap();
  }
}

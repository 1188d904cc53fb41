// 该文件是 Qiepian （切片） 项目的一部分。
// src/model.rs - 检测器边界定义
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

use std::{path::Path, time::Duration};

use image::RgbImage;
use tracing::debug;

pub mod cfg_edit;

/// 检测器输出的原始目标
///
/// 中心点与尺寸都相对于检测器实际看到的图像归一化到 `[0, 1]`，
/// 开启切片时就是单个切片，否则是整张图。
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  /// 归一化中心点 (cx, cy)
  pub center: [f32; 2],
  /// 归一化尺寸 (w, h)
  pub size: [f32; 2],
  /// 每个类别一个概率，下标即类别编号
  pub probabilities: Box<[f32]>,
}

/// 一次推理调用的结果
#[derive(Debug, Clone, Default)]
pub struct Inference {
  pub items: Box<[RawDetection]>,
  /// 检测器自己报告的耗时
  pub elapsed: Duration,
}

/// 外部检测器能力
///
/// 实例只会在创建它的线程里使用，不要求跨线程安全。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 网络原生输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  fn infer(&mut self, image: &RgbImage, threshold: f32) -> Result<Inference, Self::Error>;
}

/// 在工作线程内部构造检测器
///
/// 构造器在线程间共享，检测器本身不离开构造它的线程。
pub trait BuildDetector: Send + Sync + 'static {
  type Detector: Detector;
  type Error: std::error::Error + Send + Sync + 'static;

  fn build(&self) -> Result<Self::Detector, Self::Error>;
}

/// 类别名称表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// 从名称文件加载，每行一个类别名
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let names: Vec<String> = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(String::from)
      .collect();
    debug!("从 {} 加载 {} 个类别名称", path.as_ref().display(), names.len());
    Ok(Self { names })
  }

  /// 没有对应名称时返回 `#<编号>`
  pub fn name(&self, class: usize) -> String {
    self
      .names
      .get(class)
      .cloned()
      .unwrap_or_else(|| format!("#{}", class))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl<S: Into<String>> FromIterator<S> for Labels {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

// 该文件是 Qiepian （切片） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use std::{collections::BTreeMap, fmt};

use crate::{
  config::{DetectConfig, SortOrder},
  model::{Labels, RawDetection},
};

/// 像素坐标下的轴对齐矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PixelRect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl PixelRect {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn right(&self) -> i32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> i32 {
    self.y + self.height
  }

  pub fn area(&self) -> i64 {
    self.width as i64 * self.height as i64
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0 || self.height <= 0
  }

  pub fn translate(&self, dx: i32, dy: i32) -> Self {
    Self {
      x: self.x + dx,
      y: self.y + dy,
      ..*self
    }
  }

  /// 同时包含两个矩形的最小矩形
  pub fn union(&self, other: &Self) -> Self {
    if self.is_empty() {
      return *other;
    }
    if other.is_empty() {
      return *self;
    }
    let x = self.x.min(other.x);
    let y = self.y.min(other.y);
    Self {
      x,
      y,
      width: self.right().max(other.right()) - x,
      height: self.bottom().max(other.bottom()) - y,
    }
  }
}

/// 一个检测目标
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 图像像素坐标下的外接矩形
  pub rect: PixelRect,
  /// 归一化中心点
  pub center: [f32; 2],
  /// 归一化尺寸
  pub size: [f32; 2],
  /// 类别编号到概率，只保留不低于阈值的项
  pub probabilities: BTreeMap<usize, f32>,
  pub best_class: usize,
  pub best_probability: f32,
  pub label: String,
  /// 产生该目标的切片编号，未切片时为 0
  pub tile: usize,
}

impl Detection {
  /// 由检测器原始输出构造；没有任何类别达到阈值时返回 `None`
  ///
  /// `image_size` 是检测器实际看到的图像尺寸。
  pub fn from_raw(
    raw: &RawDetection,
    image_size: (u32, u32),
    config: &DetectConfig,
  ) -> Option<Self> {
    let probabilities: BTreeMap<usize, f32> = raw
      .probabilities
      .iter()
      .enumerate()
      .filter(|(_, p)| **p >= config.threshold)
      .map(|(class, p)| (class, *p))
      .collect();
    if probabilities.is_empty() {
      return None;
    }

    let [mut cx, mut cy] = raw.center;
    let [mut w, mut h] = raw.size;
    if config.fix_out_of_bound_values {
      fix_out_of_bound_normalized_rect(&mut cx, &mut cy, &mut w, &mut h);
    }

    let (iw, ih) = (image_size.0 as f32, image_size.1 as f32);
    let width = (w * iw).round();
    let height = (h * ih).round();
    let x = (cx * iw - width / 2.0).round();
    let y = (cy * ih - height / 2.0).round();

    let mut detection = Self {
      rect: PixelRect::new(x as i32, y as i32, width as i32, height as i32),
      center: [cx, cy],
      size: [w, h],
      probabilities,
      best_class: 0,
      best_probability: 0.0,
      label: String::new(),
      tile: 0,
    };
    detection.rename(&config.labels, config);
    Some(detection)
  }

  /// 根据像素矩形重新计算归一化中心点与尺寸
  pub fn renormalize(&mut self, image_size: (u32, u32)) {
    let (iw, ih) = (image_size.0.max(1) as f32, image_size.1.max(1) as f32);
    let rect = self.rect;
    self.center = [
      (rect.x as f32 + rect.width as f32 / 2.0) / iw,
      (rect.y as f32 + rect.height as f32 / 2.0) / ih,
    ];
    self.size = [rect.width as f32 / iw, rect.height as f32 / ih];
  }

  /// 重新选出最佳类别并生成标签
  pub fn rename(&mut self, labels: &Labels, config: &DetectConfig) {
    self.best_class = 0;
    self.best_probability = 0.0;
    for (&class, &p) in &self.probabilities {
      if p > self.best_probability {
        self.best_class = class;
        self.best_probability = p;
      }
    }

    let describe = |class: usize, p: f32| {
      if config.names_include_percentage {
        format!("{} {}%", labels.name(class), (100.0 * p).round() as i32)
      } else {
        labels.name(class)
      }
    };

    let mut label = describe(self.best_class, self.best_probability);
    if config.include_all_names && self.probabilities.len() > 1 {
      for (&class, &p) in &self.probabilities {
        if class != self.best_class {
          label.push_str(", ");
          label.push_str(&describe(class, p));
        }
      }
    }
    self.label = label;
  }

  /// 把另一个目标的概率并入自身，每个类别取较大者
  pub fn absorb_probabilities(&mut self, other: &Detection) {
    for (&class, &p) in &other.probabilities {
      let entry = self.probabilities.entry(class).or_insert(0.0);
      *entry = entry.max(p);
    }
  }
}

impl fmt::Display for Detection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "\"{}\" #{} prob={} x={} y={} w={} h={} tile={} entries={}",
      self.label,
      self.best_class,
      self.best_probability,
      self.rect.x,
      self.rect.y,
      self.rect.width,
      self.rect.height,
      self.tile,
      self.probabilities.len()
    )?;
    if self.probabilities.len() > 1 {
      write!(f, " [")?;
      for (class, p) in &self.probabilities {
        write!(f, " {}={}", class, p)?;
      }
      write!(f, " ]")?;
    }
    Ok(())
  }
}

/// 把越界的归一化矩形裁剪回 `[0, 1]`
pub fn fix_out_of_bound_normalized_rect(cx: &mut f32, cy: &mut f32, w: &mut f32, h: &mut f32) {
  if *cx - *w / 2.0 < 0.0 || *cx + *w / 2.0 > 1.0 {
    let x1 = (*cx - *w / 2.0).max(0.0);
    let x2 = (*cx + *w / 2.0).min(1.0);
    *w = x2 - x1;
    *cx = (x1 + x2) / 2.0;
  }

  if *cy - *h / 2.0 < 0.0 || *cy + *h / 2.0 > 1.0 {
    let y1 = (*cy - *h / 2.0).max(0.0);
    let y2 = (*cy + *h / 2.0).min(1.0);
    *h = y2 - y1;
    *cy = (y1 + y2) / 2.0;
  }
}

pub fn sort_detections(detections: &mut [Detection], order: SortOrder) {
  let by_probability =
    |a: &Detection, b: &Detection| a.best_probability.total_cmp(&b.best_probability);

  match order {
    SortOrder::Unsorted => {}
    SortOrder::Ascending => detections.sort_by(by_probability),
    SortOrder::Descending => detections.sort_by(|a, b| by_probability(b, a)),
    SortOrder::PageOrder => detections.sort_by(|a, b| {
      let row = |d: &Detection| (10.0 * d.center[1]).round() as i32;
      let column = |d: &Detection| (10.0 * d.center[0]).round() as i32;
      row(a)
        .cmp(&row(b))
        .then_with(|| column(a).cmp(&column(b)))
        .then_with(|| by_probability(a, b))
    }),
  }
}

/// 按检测器原始输出构造一批目标并排序
pub fn detections_from_raw(
  items: &[RawDetection],
  image_size: (u32, u32),
  config: &DetectConfig,
) -> Vec<Detection> {
  let mut detections: Vec<Detection> = items
    .iter()
    .filter_map(|raw| Detection::from_raw(raw, image_size, config))
    .collect();
  sort_detections(&mut detections, config.sort);
  detections
}

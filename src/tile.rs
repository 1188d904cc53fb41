// 该文件是 Qiepian （切片） 项目的一部分。
// src/tile.rs - 切片推理流程
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

use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::DetectConfig,
  detection::{Detection, detections_from_raw},
  model::Detector,
};

pub mod dispatcher;
pub mod merger;
pub mod planner;

pub use dispatcher::{Dispatch, dispatch_tiles, is_near_tile_edge};
pub use merger::merge_tile_detections;
pub use planner::{Tile, TileGeometry, TilePlan, plan_tiles};

#[derive(Error, Debug)]
pub enum TileError<E: std::error::Error + 'static> {
  #[error("输入图像为空")]
  EmptyImage,
  #[error("检测器推理失败: {0}")]
  Detector(#[source] E),
}

/// 一次推理的最终结果
#[derive(Debug, Clone)]
pub struct Prediction {
  pub detections: Vec<Detection>,
  pub geometry: TileGeometry,
  /// 检测器报告的耗时，切片时为各片之和
  pub duration: Duration,
}

/// 不切片，整张图直接交给检测器
pub fn detect_whole<D: Detector>(
  detector: &mut D,
  image: &RgbImage,
  config: &DetectConfig,
) -> Result<Prediction, TileError<D::Error>> {
  if image.width() == 0 || image.height() == 0 {
    return Err(TileError::EmptyImage);
  }

  let inference = detector
    .infer(image, config.threshold)
    .map_err(TileError::Detector)?;
  let detections = detections_from_raw(&inference.items, image.dimensions(), config);

  Ok(Prediction {
    detections,
    geometry: TileGeometry::single(detector.input_size()),
    duration: inference.elapsed,
  })
}

/// 规划切片、逐片推理并合并跨边界目标
///
/// 只有一片时等同于 [`detect_whole`]。
pub fn plan_and_detect<D: Detector>(
  detector: &mut D,
  image: &RgbImage,
  config: &DetectConfig,
) -> Result<Prediction, TileError<D::Error>> {
  if image.width() == 0 || image.height() == 0 {
    return Err(TileError::EmptyImage);
  }

  let plan = plan_tiles(image.dimensions(), detector.input_size());
  if plan.is_single() {
    return detect_whole(detector, image, config);
  }

  let dispatch = dispatch_tiles(detector, image, &plan, config).map_err(TileError::Detector)?;
  let found = dispatch.detections.len();
  let detections = if config.combine_tile_predictions {
    merge_tile_detections(
      dispatch.detections,
      &dispatch.edge_candidates,
      plan.image_size,
      config,
    )
  } else {
    dispatch.detections
  };

  debug!(
    "{} 片共检测到 {} 个目标，贴边 {} 个，合并后 {} 个，累计耗时 {:.2?}",
    plan.tiles.len(),
    found,
    dispatch.edge_candidates.len(),
    detections.len(),
    dispatch.duration
  );

  Ok(Prediction {
    detections,
    geometry: plan.geometry,
    duration: dispatch.duration,
  })
}

/// 带配置的检测器封装，按配置决定是否切片
pub struct TiledDetector<D: Detector> {
  detector: D,
  config: DetectConfig,
  geometry: TileGeometry,
  duration: Duration,
}

impl<D: Detector> TiledDetector<D> {
  pub fn new(detector: D, config: DetectConfig) -> Self {
    let geometry = TileGeometry::single(detector.input_size());
    Self {
      detector,
      config,
      geometry,
      duration: Duration::ZERO,
    }
  }

  pub fn predict(&mut self, image: &RgbImage) -> Result<Vec<Detection>, TileError<D::Error>> {
    let prediction = if self.config.enable_tiles {
      plan_and_detect(&mut self.detector, image, &self.config)?
    } else {
      detect_whole(&mut self.detector, image, &self.config)?
    };

    self.geometry = prediction.geometry;
    self.duration = prediction.duration;
    Ok(prediction.detections)
  }

  /// 最近一次推理的切分方式
  pub fn geometry(&self) -> TileGeometry {
    self.geometry
  }

  /// 最近一次推理的耗时
  pub fn duration(&self) -> Duration {
    self.duration
  }

  pub fn config(&self) -> &DetectConfig {
    &self.config
  }

  pub fn detector_mut(&mut self) -> &mut D {
    &mut self.detector
  }

  pub fn into_inner(self) -> D {
    self.detector
  }
}

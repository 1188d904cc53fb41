// 该文件是 Qiepian （切片） 项目的一部分。
// src/tile/dispatcher.rs - 逐片推理与坐标还原
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
use tracing::debug;

use crate::{
  config::DetectConfig,
  detection::{Detection, PixelRect, detections_from_raw},
  frame::crop,
  model::Detector,
  tile::planner::TilePlan,
};

/// 所有切片推理完成后的中间结果
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
  /// 已换算到整图坐标的全部目标
  pub detections: Vec<Detection>,
  /// 贴近切片边界的目标在 `detections` 中的下标，升序
  pub edge_candidates: Vec<usize>,
  /// 各切片推理耗时之和
  pub duration: Duration,
}

/// 判断切片内的目标是否贴近切片的任意一条边
///
/// `rect` 为切片局部坐标。
pub fn is_near_tile_edge(rect: &PixelRect, tile_size: (u32, u32), edge_factor: f32) -> bool {
  let horizontal = edge_factor * rect.width as f32;
  let vertical = edge_factor * rect.height as f32;

  rect.x as f32 <= horizontal
    || rect.y as f32 <= vertical
    || (tile_size.0 as i32 - rect.right()) as f32 <= horizontal
    || (tile_size.1 as i32 - rect.bottom()) as f32 <= vertical
}

/// 按规划顺序逐片裁剪、推理，并把结果换算回整图坐标
pub fn dispatch_tiles<D: Detector>(
  detector: &mut D,
  image: &RgbImage,
  plan: &TilePlan,
  config: &DetectConfig,
) -> Result<Dispatch, D::Error> {
  let image_size = image.dimensions();
  let mut dispatch = Dispatch::default();

  for tile in &plan.tiles {
    if tile.rect.is_empty() {
      debug!("跳过空切片 {}", tile.index);
      continue;
    }

    let region = crop(image, &tile.rect);
    let tile_size = region.dimensions();
    let inference = detector.infer(&region, config.threshold)?;
    dispatch.duration += inference.elapsed;

    let local = detections_from_raw(&inference.items, tile_size, config);
    debug!(
      "切片 {} ({}, {}) 检测到 {} 个目标，耗时 {:.2?}",
      tile.index,
      tile.rect.x,
      tile.rect.y,
      local.len(),
      inference.elapsed
    );

    for mut detection in local {
      if config.combine_tile_predictions
        && is_near_tile_edge(&detection.rect, tile_size, config.tile_edge_factor)
      {
        dispatch.edge_candidates.push(dispatch.detections.len());
      }

      detection.rect = detection.rect.translate(tile.rect.x, tile.rect.y);
      detection.tile = tile.index;
      detection.renormalize(image_size);
      dispatch.detections.push(detection);
    }
  }

  Ok(dispatch)
}

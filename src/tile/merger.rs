// 该文件是 Qiepian （切片） 项目的一部分。
// src/tile/merger.rs - 跨切片边界目标合并
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

use tracing::debug;

use crate::{
  config::DetectConfig,
  detection::{Detection, PixelRect},
};

/// 外接矩形面积不超过 `rect_factor × 两者面积之和` 时认为是同一个目标
pub fn fits_combined(lhs: &PixelRect, rhs: &PixelRect, rect_factor: f32) -> bool {
  let combined = lhs.union(rhs);
  combined.area() as f64 <= rect_factor as f64 * (lhs.area() + rhs.area()) as f64
}

fn shares_class(lhs: &Detection, rhs: &Detection) -> bool {
  lhs.probabilities.contains_key(&rhs.best_class) || rhs.probabilities.contains_key(&lhs.best_class)
}

/// 对贴边目标做一次从左到右的两两合并
///
/// `candidates` 为 `detections` 中贴边目标的下标，按升序排列。只扫一遍：
/// 跨越三片以上的目标能否完全合并取决于候选顺序。被吸收的目标从结果中移除。
pub fn merge_tile_detections(
  mut detections: Vec<Detection>,
  candidates: &[usize],
  image_size: (u32, u32),
  config: &DetectConfig,
) -> Vec<Detection> {
  if candidates.is_empty() {
    return detections;
  }

  let mut consumed = vec![false; detections.len()];
  let mut merged = 0usize;

  for (position, &lhs_idx) in candidates.iter().enumerate() {
    if consumed[lhs_idx] {
      continue;
    }

    for &rhs_idx in &candidates[position + 1..] {
      if consumed[rhs_idx] {
        continue;
      }

      let (lhs, rhs) = (&detections[lhs_idx], &detections[rhs_idx]);
      if lhs.tile == rhs.tile {
        continue;
      }
      if config.only_combine_similar_predictions && !shares_class(lhs, rhs) {
        continue;
      }
      if !fits_combined(&lhs.rect, &rhs.rect, config.tile_rect_factor) {
        continue;
      }

      let rhs = detections[rhs_idx].clone();
      let lhs = &mut detections[lhs_idx];
      debug!("合并切片 {} 与切片 {} 的目标: {} + {}", lhs.tile, rhs.tile, lhs, rhs);

      lhs.rect = lhs.rect.union(&rhs.rect);
      lhs.renormalize(image_size);
      lhs.absorb_probabilities(&rhs);
      lhs.rename(&config.labels, config);
      consumed[rhs_idx] = true;
      merged += 1;
    }
  }

  if merged > 0 {
    debug!("共合并 {} 个跨切片目标", merged);
  }

  detections
    .into_iter()
    .zip(consumed)
    .filter_map(|(detection, consumed)| (!consumed).then_some(detection))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  const IMAGE: (u32, u32) = (800, 400);

  fn detection(rect: PixelRect, tile: usize, probabilities: &[(usize, f32)]) -> Detection {
    let config = DetectConfig::default();
    let mut detection = Detection {
      rect,
      center: [0.0, 0.0],
      size: [0.0, 0.0],
      probabilities: probabilities.iter().copied().collect::<BTreeMap<_, _>>(),
      best_class: 0,
      best_probability: 0.0,
      label: String::new(),
      tile,
    };
    detection.renormalize(IMAGE);
    detection.rename(&config.labels, &config);
    detection
  }

  fn all(detections: &[Detection]) -> Vec<usize> {
    (0..detections.len()).collect()
  }

  #[test]
  fn split_object_is_rejoined() {
    let detections = vec![
      detection(PixelRect::new(350, 100, 50, 100), 0, &[(2, 0.6), (5, 0.7)]),
      detection(PixelRect::new(400, 100, 50, 100), 1, &[(2, 0.9)]),
    ];
    let candidates = all(&detections);
    let merged = merge_tile_detections(detections, &candidates, IMAGE, &DetectConfig::default());

    assert_eq!(merged.len(), 1);
    let object = &merged[0];
    assert_eq!(object.rect, PixelRect::new(350, 100, 100, 100));
    assert_eq!(object.tile, 0);
    assert_eq!(object.probabilities, BTreeMap::from([(2, 0.9), (5, 0.7)]));
    assert_eq!(object.best_class, 2);
    assert_eq!(object.label, "#2 90%, #5 70%");
    assert!((object.center[0] - 0.5).abs() < 1e-6);
    assert!((object.size[0] - 0.125).abs() < 1e-6);
  }

  #[test]
  fn rect_factor_controls_slack() {
    let lhs = PixelRect::new(350, 100, 50, 100);
    let misaligned = PixelRect::new(400, 110, 50, 100);
    assert!(fits_combined(&lhs, &misaligned, 1.20));
    assert!(!fits_combined(&lhs, &misaligned, 1.0));
    assert!(fits_combined(&lhs, &PixelRect::new(400, 100, 50, 100), 1.0));
    assert!(!fits_combined(&lhs, &PixelRect::new(400, 100, 50, 100), 0.9));

    let detections = vec![
      detection(lhs, 0, &[(0, 0.9)]),
      detection(misaligned, 1, &[(0, 0.9)]),
    ];
    let candidates = all(&detections);
    let strict = DetectConfig::default().tile_rect_factor(1.0);
    assert_eq!(merge_tile_detections(detections, &candidates, IMAGE, &strict).len(), 2);
  }

  #[test]
  fn same_tile_is_never_merged() {
    let detections = vec![
      detection(PixelRect::new(350, 100, 50, 100), 0, &[(0, 0.9)]),
      detection(PixelRect::new(400, 100, 50, 100), 0, &[(0, 0.9)]),
    ];
    let candidates = all(&detections);
    assert_eq!(
      merge_tile_detections(detections, &candidates, IMAGE, &DetectConfig::default()).len(),
      2
    );
  }

  #[test]
  fn different_classes_stay_apart_unless_allowed() {
    let detections = vec![
      detection(PixelRect::new(350, 100, 50, 100), 0, &[(0, 0.9)]),
      detection(PixelRect::new(400, 100, 50, 100), 1, &[(1, 0.9)]),
    ];
    let candidates = all(&detections);
    let kept = merge_tile_detections(detections.clone(), &candidates, IMAGE, &DetectConfig::default());
    assert_eq!(kept.len(), 2);

    let any_class = DetectConfig::default().only_combine_similar_predictions(false);
    let merged = merge_tile_detections(detections, &candidates, IMAGE, &any_class);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].probabilities.len(), 2);
  }

  #[test]
  fn only_candidates_take_part() {
    let detections = vec![
      detection(PixelRect::new(350, 100, 50, 100), 0, &[(0, 0.9)]),
      detection(PixelRect::new(400, 100, 50, 100), 1, &[(0, 0.9)]),
    ];
    let merged = merge_tile_detections(detections, &[0], IMAGE, &DetectConfig::default());
    assert_eq!(merged.len(), 2);
  }

  #[test]
  fn second_pass_finds_nothing_new() {
    let detections = vec![
      detection(PixelRect::new(350, 100, 50, 100), 0, &[(0, 0.9)]),
      detection(PixelRect::new(10, 10, 30, 30), 0, &[(0, 0.8)]),
      detection(PixelRect::new(400, 100, 50, 100), 1, &[(0, 0.7)]),
      detection(PixelRect::new(600, 300, 40, 40), 1, &[(0, 0.6)]),
    ];
    let config = DetectConfig::default();
    let candidates = all(&detections);
    let once = merge_tile_detections(detections, &candidates, IMAGE, &config);
    let candidates = all(&once);
    let twice = merge_tile_detections(once.clone(), &candidates, IMAGE, &config);
    assert_eq!(once.len(), 3);
    assert_eq!(once, twice);
  }

  #[test]
  fn chains_depend_on_candidate_order() {
    // 三片横向排列的同一目标，中间一片排在最后
    let left = detection(PixelRect::new(0, 0, 100, 50), 0, &[(0, 0.9)]);
    let middle = detection(PixelRect::new(100, 0, 100, 50), 1, &[(0, 0.9)]);
    let right = detection(PixelRect::new(200, 0, 100, 50), 2, &[(0, 0.9)]);
    let config = DetectConfig::default();

    let in_order = vec![left.clone(), middle.clone(), right.clone()];
    let merged = merge_tile_detections(in_order, &[0, 1, 2], IMAGE, &config);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].rect, PixelRect::new(0, 0, 300, 50));

    let out_of_order = vec![left, right, middle];
    let merged = merge_tile_detections(out_of_order, &[0, 1, 2], IMAGE, &config);
    assert_eq!(merged.len(), 2);
  }
}

// 该文件是 Qiepian （切片） 项目的一部分。
// src/output/draw.rs - 检测结果可视化与记录
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

use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_line_segment_mut},
  rect::Rect,
};

use crate::{detection::Detection, tile::TilePlan};

const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const GRID_COLOR: [u8; 3] = [255, 255, 0]; // 黄色
const BOX_THICKNESS: i32 = 2;

pub struct Draw {
  box_color: [u8; 3],
  grid_color: [u8; 3],
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      box_color: BOX_COLOR,
      grid_color: GRID_COLOR,
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  /// 在图像上绘制每个目标的外接矩形，越界部分会被裁掉
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      let rect = detection.rect;
      // 向内加粗
      for t in 0..self.thickness {
        let (width, height) = (rect.width - 2 * t, rect.height - 2 * t);
        if width <= 0 || height <= 0 {
          break;
        }
        let r = Rect::at(rect.x + t, rect.y + t).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, r, Rgb(self.box_color));
      }
    }
  }

  /// 画出切片之间的分界线
  pub fn draw_tile_grid(&self, image: &mut RgbImage, plan: &TilePlan) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let color = Rgb(self.grid_color);

    for tile in plan.tiles.iter().filter(|t| t.row == 0 && t.column > 0) {
      let x = tile.rect.x as f32;
      draw_line_segment_mut(image, (x, 0.0), (x, height - 1.0), color);
    }
    for tile in plan.tiles.iter().filter(|t| t.column == 0 && t.row > 0) {
      let y = tile.rect.y as f32;
      draw_line_segment_mut(image, (0.0, y), (width - 1.0, y), color);
    }
  }
}

/// YOLO 格式的标注记录，每行 `class cx cy w h`
pub struct Record;

impl Record {
  pub fn format(detections: &[Detection]) -> String {
    let mut lines = String::new();
    for detection in detections {
      lines.push_str(&format!(
        "{} {:.6} {:.6} {:.6} {:.6}\n",
        detection.best_class,
        detection.center[0],
        detection.center[1],
        detection.size[0],
        detection.size[1]
      ));
    }
    lines
  }

  pub fn record(detections: &[Detection], path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path, Self::format(detections))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::DetectConfig, model::RawDetection, tile::plan_tiles};

  fn detection(center: [f32; 2], size: [f32; 2], image: (u32, u32)) -> Detection {
    let raw = RawDetection {
      center,
      size,
      probabilities: vec![0.0, 0.75].into_boxed_slice(),
    };
    Detection::from_raw(&raw, image, &DetectConfig::default()).unwrap()
  }

  #[test]
  fn boxes_are_drawn_inside_rect() {
    let mut image = RgbImage::new(40, 40);
    let d = detection([0.5, 0.5], [0.5, 0.5], (40, 40));
    Draw::default().draw_detections(&mut image, &[d]);

    assert_eq!(image.get_pixel(10, 10), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(11, 20), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(29, 29), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(12, 20), &Rgb([0, 0, 0]));
  }

  #[test]
  fn grid_follows_tile_boundaries() {
    let mut image = RgbImage::new(200, 100);
    let plan = plan_tiles(image.dimensions(), (100, 100));
    Draw::default().draw_tile_grid(&mut image, &plan);
    assert_eq!(image.get_pixel(100, 50), &Rgb(GRID_COLOR));
    assert_eq!(image.get_pixel(99, 50), &Rgb([0, 0, 0]));
  }

  #[test]
  fn record_uses_yolo_lines() {
    let d = detection([0.5, 0.25], [0.2, 0.1], (200, 400));
    assert_eq!(Record::format(&[d]), "1 0.500000 0.250000 0.200000 0.100000\n");
  }
}

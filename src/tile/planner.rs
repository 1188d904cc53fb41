// 该文件是 Qiepian （切片） 项目的一部分。
// src/tile/planner.rs - 切片规划
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

use crate::detection::PixelRect;

/// 一张图像的切分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
  pub horizontal_tiles: u32,
  pub vertical_tiles: u32,
  pub tile_width: u32,
  pub tile_height: u32,
}

impl TileGeometry {
  /// 未切片时的退化形式，切片尺寸即网络尺寸
  pub fn single(network_size: (u32, u32)) -> Self {
    Self {
      horizontal_tiles: 1,
      vertical_tiles: 1,
      tile_width: network_size.0,
      tile_height: network_size.1,
    }
  }

  pub fn is_single(&self) -> bool {
    self.horizontal_tiles == 1 && self.vertical_tiles == 1
  }

  pub fn tile_count(&self) -> usize {
    self.horizontal_tiles as usize * self.vertical_tiles as usize
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
  /// `row * horizontal_tiles + column`
  pub index: usize,
  pub row: u32,
  pub column: u32,
  pub rect: PixelRect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
  pub image_size: (u32, u32),
  pub geometry: TileGeometry,
  /// 按行优先排列
  pub tiles: Vec<Tile>,
}

impl TilePlan {
  pub fn is_single(&self) -> bool {
    self.geometry.is_single()
  }
}

fn tile_count(image_extent: u32, network_extent: u32) -> u32 {
  let factor = image_extent as f64 / network_extent.max(1) as f64;
  let count = factor.max(1.0).round() as u32;
  count.min(image_extent.max(1))
}

/// 第 `index` 条切片边界，最后一条恰好落在图像边缘
fn boundary(index: u32, count: u32, tile_extent: f64, image_extent: u32) -> u32 {
  if index >= count {
    image_extent
  } else {
    ((index as f64 * tile_extent).round() as u32).min(image_extent)
  }
}

/// 根据图像尺寸与网络输入尺寸规划切片
///
/// 每个方向的切片数为 `round(max(1, 图像/网络))`，略大于网络输入的图像仍只有一片。
/// 所有切片恰好铺满图像，互不重叠，也不会越出图像边界。
pub fn plan_tiles(image_size: (u32, u32), network_size: (u32, u32)) -> TilePlan {
  let (width, height) = image_size;
  let horizontal_tiles = tile_count(width, network_size.0);
  let vertical_tiles = tile_count(height, network_size.1);

  if horizontal_tiles == 1 && vertical_tiles == 1 {
    return TilePlan {
      image_size,
      geometry: TileGeometry::single(network_size),
      tiles: vec![Tile {
        index: 0,
        row: 0,
        column: 0,
        rect: PixelRect::new(0, 0, width as i32, height as i32),
      }],
    };
  }

  let tile_width = width as f64 / horizontal_tiles as f64;
  let tile_height = height as f64 / vertical_tiles as f64;
  let geometry = TileGeometry {
    horizontal_tiles,
    vertical_tiles,
    tile_width: tile_width.round() as u32,
    tile_height: tile_height.round() as u32,
  };

  let mut tiles = Vec::with_capacity(geometry.tile_count());
  for row in 0..vertical_tiles {
    let top = boundary(row, vertical_tiles, tile_height, height);
    let bottom = boundary(row + 1, vertical_tiles, tile_height, height);
    for column in 0..horizontal_tiles {
      let left = boundary(column, horizontal_tiles, tile_width, width);
      let right = boundary(column + 1, horizontal_tiles, tile_width, width);
      tiles.push(Tile {
        index: (row * horizontal_tiles + column) as usize,
        row,
        column,
        rect: PixelRect::new(
          left as i32,
          top as i32,
          (right - left) as i32,
          (bottom - top) as i32,
        ),
      });
    }
  }

  debug!(
    "图像 {}x{} 切分为 {}x{} 片，每片约 {}x{}",
    width, height, horizontal_tiles, vertical_tiles, geometry.tile_width, geometry.tile_height
  );

  TilePlan {
    image_size,
    geometry,
    tiles,
  }
}

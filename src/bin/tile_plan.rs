// 该文件是 Qiepian （切片） 项目的一部分。
// src/bin/tile_plan.rs - 切片规划查看工具
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

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde_json::json;
use tracing::info;
use url::Url;

use qiepian::{
  FromUrl,
  input::ImageFileInput,
  output::draw::Draw,
  tile::{TilePlan, plan_tiles},
};

/// 查看图像按网络输入尺寸会被如何切片
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像或目录，例如 image:///data/frame.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 网络输入尺寸，格式为 宽x高
  #[arg(long, value_name = "WxH", default_value = "416x416", value_parser = parse_size)]
  pub network: (u32, u32),
  /// 画出切片网格后的图像保存目录
  #[arg(long, value_name = "DIR")]
  pub output: Option<PathBuf>,
}

fn parse_size(s: &str) -> Result<(u32, u32)> {
  let (w, h) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| anyhow!("尺寸格式应为 宽x高: {}", s))?;
  Ok((w.trim().parse()?, h.trim().parse()?))
}

fn plan_to_json(path: &str, plan: &TilePlan) -> serde_json::Value {
  let tiles: Vec<serde_json::Value> = plan
    .tiles
    .iter()
    .map(|tile| {
      json!({
        "index": tile.index,
        "row": tile.row,
        "column": tile.column,
        "x": tile.rect.x,
        "y": tile.rect.y,
        "width": tile.rect.width,
        "height": tile.rect.height,
      })
    })
    .collect();

  json!({
    "file": path,
    "width": plan.image_size.0,
    "height": plan.image_size.1,
    "geometry": {
      "horizontal_tiles": plan.geometry.horizontal_tiles,
      "vertical_tiles": plan.geometry.vertical_tiles,
      "tile_width": plan.geometry.tile_width,
      "tile_height": plan.geometry.tile_height,
    },
    "tiles": tiles,
  })
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入来源: {}", args.input);
  info!("网络尺寸: {}x{}", args.network.0, args.network.1);

  let input = ImageFileInput::from_url(&args.input)?;
  if let Some(dir) = &args.output {
    std::fs::create_dir_all(dir).with_context(|| format!("无法创建输出目录: {}", dir.display()))?;
  }

  let draw = Draw::default();
  let mut plans = Vec::new();
  for (path, image) in input {
    let mut image = image.with_context(|| format!("无法读取图像: {}", path.display()))?;
    let plan = plan_tiles(image.dimensions(), args.network);
    info!(
      "{}: {}x{} -> {} 片",
      path.display(),
      plan.image_size.0,
      plan.image_size.1,
      plan.tiles.len()
    );

    if let Some(dir) = &args.output {
      draw.draw_tile_grid(&mut image, &plan);
      let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
      let target = dir.join(format!("{}-tiles.png", stem));
      image
        .save(&target)
        .with_context(|| format!("无法保存图像: {}", target.display()))?;
      info!("网格图已保存到 {}", target.display());
    }

    plans.push(plan_to_json(&path.to_string_lossy(), &plan));
  }

  println!("{}", serde_json::to_string_pretty(&plans)?);
  Ok(())
}

// 该文件是 Qiepian （切片） 项目的一部分。
// src/frame.rs - 图像区域裁剪
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

use image::{RgbImage, imageops};

use crate::detection::PixelRect;

/// 复制图像中的一块区域，区域会先被限制在图像范围内
pub fn crop(image: &RgbImage, rect: &PixelRect) -> RgbImage {
  let x = rect.x.clamp(0, image.width() as i32) as u32;
  let y = rect.y.clamp(0, image.height() as i32) as u32;
  let width = (rect.width.max(0) as u32).min(image.width() - x);
  let height = (rect.height.max(0) as u32).min(image.height() - y);
  imageops::crop_imm(image, x, y, width, height).to_image()
}

// 该文件是 Qiepian （切片） 项目的一部分。
// src/input/read_image_file.rs - 按 URL 读取图像文件
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

use image::RgbImage;
use tracing::error;
use url::Url;

use super::{InputError, collect_image_files, load_image};
use crate::{FromUrl, FromUrlWithScheme};

/// `image:///path/to/file.jpg` 或 `image:///path/to/dir`
///
/// 目录会被递归展开，迭代时逐张解码。
#[derive(Debug, Clone)]
pub struct ImageFileInput {
  files: Vec<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let files = collect_image_files(url.path())?;
    Ok(ImageFileInput { files })
  }
}

impl ImageFileInput {
  pub fn files(&self) -> &[PathBuf] {
    &self.files
  }
}

impl IntoIterator for ImageFileInput {
  type Item = (PathBuf, Result<RgbImage, InputError>);
  type IntoIter = ImageFileIter;

  fn into_iter(self) -> Self::IntoIter {
    ImageFileIter {
      files: self.files.into_iter(),
    }
  }
}

pub struct ImageFileIter {
  files: std::vec::IntoIter<PathBuf>,
}

impl Iterator for ImageFileIter {
  type Item = (PathBuf, Result<RgbImage, InputError>);

  fn next(&mut self) -> Option<Self::Item> {
    self.files.next().map(|path| {
      let image = load_image(&path);
      (path, image)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_loads_image_file() {
    let dir = std::env::temp_dir().join(format!("qiepian-read-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("pixel.png");
    RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30])).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.files().len(), 1);

    let frames: Vec<_> = input.into_iter().collect();
    let image = frames[0].1.as_ref().unwrap();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(2, 1), &image::Rgb([10, 20, 30]));

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn url_scheme_is_checked() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::SchemeMismatch { .. })
    ));
  }
}

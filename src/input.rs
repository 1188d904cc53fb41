// 该文件是 Qiepian （切片） 项目的一部分。
// src/input.rs - 图像输入与文件枚举
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

mod read_image_file;

pub use self::read_image_file::ImageFileInput;

/// 会被当作图像加入队列的扩展名
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("路径不存在: {0}")]
  NotFound(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像读取失败: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 扩展名不区分大小写
pub fn has_image_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

/// 读取并解码为 RGB 图像
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage, InputError> {
  let image = ImageReader::open(path.as_ref())?
    .with_guessed_format()?
    .decode()?;
  Ok(image.to_rgb8())
}

/// 展开一个输入路径
///
/// 文件本身直接返回（不检查扩展名）；目录则递归收集所有图像文件，结果按路径排序。
/// 返回的路径均已规范化。
pub fn collect_image_files<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>, InputError> {
  let path = path.as_ref();
  if !path.exists() {
    return Err(InputError::NotFound(path.to_path_buf()));
  }

  let path = path.canonicalize()?;
  if !path.is_dir() {
    return Ok(vec![path]);
  }

  let mut files = Vec::new();
  let mut pending = vec![path.clone()];
  while let Some(dir) = pending.pop() {
    for entry in std::fs::read_dir(&dir)? {
      let entry_path = entry?.path();
      if entry_path.is_dir() {
        pending.push(entry_path);
      } else if has_image_extension(&entry_path) {
        files.push(entry_path.canonicalize()?);
      }
    }
  }
  files.sort();

  debug!("在 {} 下找到 {} 个图像文件", path.display(), files.len());
  Ok(files)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qiepian-input-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn extensions_ignore_case() {
    assert!(has_image_extension(Path::new("a/b.JPG")));
    assert!(has_image_extension(Path::new("b.jpeg")));
    assert!(has_image_extension(Path::new("c.Png")));
    assert!(!has_image_extension(Path::new("d.txt")));
    assert!(!has_image_extension(Path::new("jpg")));
  }

  #[test]
  fn directories_are_walked_recursively() {
    let dir = scratch("walk");
    std::fs::create_dir_all(dir.join("nested/deeper")).unwrap();
    for name in ["a.jpg", "notes.txt", "nested/b.PNG", "nested/deeper/c.jpeg"] {
      std::fs::write(dir.join(name), b"").unwrap();
    }

    let files = collect_image_files(&dir).unwrap();
    let names: Vec<String> = files
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(files.len(), 3);
    assert!(names.contains(&"a.jpg".to_string()));
    assert!(names.contains(&"b.PNG".to_string()));
    assert!(names.contains(&"c.jpeg".to_string()));
    assert!(files.iter().all(|p| p.is_absolute()));

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn single_file_and_missing_path() {
    let dir = scratch("single");
    let file = dir.join("only.txt");
    std::fs::write(&file, b"").unwrap();
    assert_eq!(collect_image_files(&file).unwrap(), vec![file.canonicalize().unwrap()]);
    assert!(matches!(
      collect_image_files(dir.join("missing")),
      Err(InputError::NotFound(_))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
  }
}

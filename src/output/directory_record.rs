// 该文件是 Qiepian （切片） 项目的一部分。
// src/output/directory_record.rs - 批处理结果目录输出
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

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
};

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use tracing::debug;
use url::Url;

use super::{OutputError, Render};
use crate::{
  FromUrl, FromUrlWithScheme,
  detection::Detection,
  output::draw::{Draw, Record},
};

const ANNOTATED_JPEG_QUALITY: u8 = 75;

/// 批处理的输出目录及附带动作
///
/// `folder:///output/dir?annotate&record&delete`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutput {
  pub directory: PathBuf,
  /// 写出 `<stem>.jpg` 标注图
  pub annotate: bool,
  /// 写出 `<stem>.txt` YOLO 格式标注
  pub record: bool,
  /// 处理成功后删除源文件
  pub delete_input: bool,
}

impl PoolOutput {
  pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
    Self {
      directory: directory.into(),
      annotate: false,
      record: false,
      delete_input: false,
    }
  }

  pub fn annotate(mut self, enable: bool) -> Self {
    self.annotate = enable;
    self
  }

  pub fn record(mut self, enable: bool) -> Self {
    self.record = enable;
    self
  }

  pub fn delete_input(mut self, enable: bool) -> Self {
    self.delete_input = enable;
    self
  }

  /// 标注图路径，扩展名固定为 jpg
  pub fn annotated_path(&self, identifier: &str) -> PathBuf {
    self.directory.join(format!("{}.jpg", stem_of(identifier)))
  }

  pub fn record_path(&self, identifier: &str) -> PathBuf {
    self.directory.join(format!("{}.txt", stem_of(identifier)))
  }

  /// 目录不存在时创建，并换成规范路径
  pub fn prepare(&mut self) -> Result<(), OutputError> {
    std::fs::create_dir_all(&self.directory)?;
    self.directory = self.directory.canonicalize()?;
    Ok(())
  }

  fn save_annotated(&self, path: &Path, image: &RgbImage) -> Result<(), OutputError> {
    let writer = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(writer, ANNOTATED_JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(())
  }
}

fn stem_of(identifier: &str) -> String {
  Path::new(identifier)
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| identifier.to_string())
}

impl Render for PoolOutput {
  type Error = OutputError;

  fn render_result(
    &self,
    identifier: &str,
    image: &RgbImage,
    detections: &[Detection],
  ) -> Result<(), Self::Error> {
    if self.annotate {
      let mut annotated = image.clone();
      Draw::default().draw_detections(&mut annotated, detections);
      let path = self.annotated_path(identifier);
      self.save_annotated(&path, &annotated)?;
      debug!("标注图已写入 {}", path.display());
    }

    if self.record {
      let path = self.record_path(identifier);
      Record::record(detections, &path)?;
      debug!("标注记录已写入 {}", path.display());
    }

    Ok(())
  }
}

impl FromUrlWithScheme for PoolOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for PoolOutput {
  type Error = OutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: uri.scheme().to_string(),
      });
    }

    let mut output = PoolOutput::new(uri.path());
    for (key, _) in uri.query_pairs() {
      match key.as_ref() {
        "annotate" => output.annotate = true,
        "record" => output.record = true,
        "delete" => output.delete_input = true,
        other => return Err(OutputError::UnknownKey(other.to_string())),
      }
    }
    Ok(output)
  }
}

// 该文件是 Qiepian （切片） 项目的一部分。
// src/config.rs - 检测配置
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

use std::{path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Labels};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("参数 {key} 的取值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("未知参数: {0}")]
  UnknownKey(String),
  #[error("类别名称文件读取失败: {0}")]
  LabelsError(#[from] std::io::Error),
}

/// 每次推理后的排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
  Unsorted,
  /// 按最佳概率升序
  #[default]
  Ascending,
  /// 按最佳概率降序
  Descending,
  /// 先行后列，类似阅读顺序
  PageOrder,
}

impl FromStr for SortOrder {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" | "unsorted" => Ok(SortOrder::Unsorted),
      "asc" | "ascending" => Ok(SortOrder::Ascending),
      "desc" | "descending" => Ok(SortOrder::Descending),
      "page" => Ok(SortOrder::PageOrder),
      _ => Err(ConfigError::InvalidValue {
        key: "sort".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

/// 检测与切片合并的配置
#[derive(Debug, Clone, PartialEq)]
pub struct DetectConfig {
  /// 概率阈值，低于该值的类别会被丢弃
  pub threshold: f32,
  pub labels: Labels,
  /// 标签中附带百分比
  pub names_include_percentage: bool,
  /// 标签中列出所有达到阈值的类别
  pub include_all_names: bool,
  pub fix_out_of_bound_values: bool,
  pub sort: SortOrder,
  /// 图像明显大于网络输入时切片推理
  pub enable_tiles: bool,
  /// 合并跨切片边界的目标
  pub combine_tile_predictions: bool,
  /// 只合并类别相近的目标
  pub only_combine_similar_predictions: bool,
  /// 距切片边界不超过 `tile_edge_factor × 目标宽/高` 视为贴边
  pub tile_edge_factor: f32,
  /// 合并后面积不超过 `tile_rect_factor × 两者面积之和` 才合并
  pub tile_rect_factor: f32,
  /// 网络定义文件，启动工作线程前可能需要修改
  pub model_definition: Option<PathBuf>,
  pub modify_batch_and_subdivisions: bool,
  /// 加载检测器时屏蔽本线程日志
  pub quiet_load: bool,
}

impl Default for DetectConfig {
  fn default() -> Self {
    Self {
      threshold: 0.5,
      labels: Labels::default(),
      names_include_percentage: true,
      include_all_names: true,
      fix_out_of_bound_values: true,
      sort: SortOrder::Ascending,
      enable_tiles: false,
      combine_tile_predictions: true,
      only_combine_similar_predictions: true,
      tile_edge_factor: 0.25,
      tile_rect_factor: 1.20,
      model_definition: None,
      modify_batch_and_subdivisions: true,
      quiet_load: false,
    }
  }
}

impl DetectConfig {
  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn names_include_percentage(mut self, enable: bool) -> Self {
    self.names_include_percentage = enable;
    self
  }

  pub fn include_all_names(mut self, enable: bool) -> Self {
    self.include_all_names = enable;
    self
  }

  pub fn fix_out_of_bound_values(mut self, enable: bool) -> Self {
    self.fix_out_of_bound_values = enable;
    self
  }

  pub fn sort(mut self, sort: SortOrder) -> Self {
    self.sort = sort;
    self
  }

  pub fn enable_tiles(mut self, enable: bool) -> Self {
    self.enable_tiles = enable;
    self
  }

  pub fn combine_tile_predictions(mut self, enable: bool) -> Self {
    self.combine_tile_predictions = enable;
    self
  }

  pub fn only_combine_similar_predictions(mut self, enable: bool) -> Self {
    self.only_combine_similar_predictions = enable;
    self
  }

  pub fn tile_edge_factor(mut self, factor: f32) -> Self {
    self.tile_edge_factor = factor;
    self
  }

  pub fn tile_rect_factor(mut self, factor: f32) -> Self {
    self.tile_rect_factor = factor;
    self
  }

  pub fn model_definition<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.model_definition = Some(path.into());
    self
  }

  pub fn modify_batch_and_subdivisions(mut self, enable: bool) -> Self {
    self.modify_batch_and_subdivisions = enable;
    self
  }

  pub fn quiet_load(mut self, enable: bool) -> Self {
    self.quiet_load = enable;
    self
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

/// 只写键名视为开启
fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

impl FromUrlWithScheme for DetectConfig {
  const SCHEME: &'static str = "detect";
}

impl FromUrl for DetectConfig {
  type Error = ConfigError;

  /// `detect:///path/model.cfg?threshold=0.3&tiles&edge_factor=0.25&rect_factor=1.2`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let mut config = DetectConfig::default();
    if !url.path().is_empty() && url.path() != "/" {
      config.model_definition = Some(PathBuf::from(url.path()));
    }

    for (key, value) in url.query_pairs() {
      let (key, value) = (key.as_ref(), value.as_ref());
      match key {
        "threshold" => config.threshold = parse_value(key, value)?,
        "names" => config.labels = Labels::from_file(value)?,
        "percentage" => config.names_include_percentage = parse_flag(key, value)?,
        "all_names" => config.include_all_names = parse_flag(key, value)?,
        "fix_bounds" => config.fix_out_of_bound_values = parse_flag(key, value)?,
        "sort" => config.sort = value.parse()?,
        "tiles" => config.enable_tiles = parse_flag(key, value)?,
        "combine" => config.combine_tile_predictions = parse_flag(key, value)?,
        "similar" => config.only_combine_similar_predictions = parse_flag(key, value)?,
        "edge_factor" => config.tile_edge_factor = parse_value(key, value)?,
        "rect_factor" => config.tile_rect_factor = parse_value(key, value)?,
        "single_batch" => config.modify_batch_and_subdivisions = parse_flag(key, value)?,
        "quiet" => config.quiet_load = parse_flag(key, value)?,
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
      }
    }

    debug!("检测配置: {:?}", config);
    Ok(config)
  }
}

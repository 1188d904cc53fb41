// 该文件是 Qiepian （切片） 项目的一部分。
// src/model/cfg_edit.rs - 网络定义文件 [net] 段修改
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

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;
use tracing::{debug, info};

const NET_SECTION: &str = "[net]";

#[derive(Error, Debug)]
pub enum CfgEditError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("未找到 [net] 段: {0}")]
  NetSectionMissing(String),
}

/// 把 [net] 段的 batch 与 subdivisions 都设为 1
///
/// 使用对比损失 (`contrastive=1`) 的网络保持原样。返回被修改的行数。
pub fn force_single_batch<P: AsRef<Path>>(path: P) -> Result<usize, CfgEditError> {
  let changes = BTreeMap::from([("batch", "1"), ("subdivisions", "1")]);
  edit_net_section(path.as_ref(), changes, true)
}

/// 修改 [net] 段中的键值，缺失的键追加到段末尾。返回被修改的行数。
pub fn edit_cfg_file<P: AsRef<Path>>(
  path: P,
  changes: BTreeMap<&str, &str>,
) -> Result<usize, CfgEditError> {
  edit_net_section(path.as_ref(), changes, false)
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
  let (key, value) = line.split_once('=')?;
  let key = key.trim();
  if key.is_empty() || key.contains('#') || key.contains(char::is_whitespace) {
    return None;
  }
  Some((key, value.trim_start()))
}

fn edit_net_section(
  path: &Path,
  mut changes: BTreeMap<&str, &str>,
  keep_contrastive: bool,
) -> Result<usize, CfgEditError> {
  if changes.is_empty() {
    return Ok(0);
  }

  let text = std::fs::read_to_string(path)?;
  let mut lines: Vec<String> = text.lines().map(String::from).collect();

  let net_start = lines
    .iter()
    .position(|line| line.starts_with(NET_SECTION))
    .ok_or_else(|| CfgEditError::NetSectionMissing(path.display().to_string()))?;
  let mut net_end = lines[net_start + 1..]
    .iter()
    .position(|line| line.starts_with('['))
    .map(|offset| net_start + 1 + offset)
    .unwrap_or(lines.len());

  let mut changed = 0usize;
  for line in lines[net_start + 1..net_end].iter_mut() {
    let Some((key, value)) = split_key_value(line) else {
      continue;
    };

    if keep_contrastive && key == "contrastive" && value.trim_end() == "1" {
      info!("{} 使用 contrastive，保持 batch 与 subdivisions 不变", path.display());
      return Ok(0);
    }

    if let Some(new_value) = changes.remove(key) {
      if value != new_value {
        *line = format!("{}={}", key, new_value);
        changed += 1;
      }
    }
  }

  for (key, value) in changes {
    lines.insert(net_end, format!("{}={}", key, value));
    net_end += 1;
    changed += 1;
  }

  if changed == 0 {
    debug!("{} 无需修改", path.display());
    return Ok(0);
  }

  let mut tmp = path.as_os_str().to_owned();
  tmp.push("_TMP");
  let mut output = lines.join("\n");
  output.push('\n');
  std::fs::write(&tmp, output)?;
  std::fs::rename(&tmp, path)?;

  info!("已修改 {} 中的 {} 行", path.display(), changed);
  Ok(changed)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch(name: &str, content: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("qiepian-{}-{}.cfg", name, std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn rewrites_batch_and_appends_missing_keys() {
    let path = scratch(
      "batch",
      "[net]\nbatch=64\n# subdivisions=8\nwidth=416\n\n[convolutional]\nbatch=64\n",
    );
    let changed = force_single_batch(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(changed, 2);
    assert_eq!(
      text,
      "[net]\nbatch=1\n# subdivisions=8\nwidth=416\n\nsubdivisions=1\n[convolutional]\nbatch=64\n"
    );
  }

  #[test]
  fn contrastive_networks_are_left_alone() {
    let original = "[net]\nbatch=64\nsubdivisions=16\ncontrastive=1\n[yolo]\n";
    let path = scratch("contrastive", original);
    let changed = force_single_batch(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(changed, 0);
    assert_eq!(text, original);
  }

  #[test]
  fn arbitrary_keys_ignore_contrastive() {
    let path = scratch(
      "resize",
      "[net]\nbatch=64\ncontrastive=1\nwidth=416\n[yolo]\nclasses=80\n",
    );
    let changes = BTreeMap::from([("width", "608"), ("height", "608")]);
    let changed = edit_cfg_file(&path, changes).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(changed, 2);
    assert_eq!(
      text,
      "[net]\nbatch=64\ncontrastive=1\nwidth=608\nheight=608\n[yolo]\nclasses=80\n"
    );
  }

  #[test]
  fn unchanged_values_do_not_rewrite() {
    let path = scratch("noop", "[net]\nbatch = 1\nsubdivisions=1\n");
    let changed = force_single_batch(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(changed, 0);
  }

  #[test]
  fn missing_net_section_is_an_error() {
    let path = scratch("missing", "[convolutional]\nfilters=32\n");
    let result = force_single_batch(&path);
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(result, Err(CfgEditError::NetSectionMissing(_))));
  }
}

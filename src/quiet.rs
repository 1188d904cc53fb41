// 该文件是 Qiepian （切片） 项目的一部分。
// src/quiet.rs - 线程内日志静默
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

use tracing::subscriber::{DefaultGuard, NoSubscriber};

/// 在当前线程内屏蔽日志，离开作用域后恢复原来的订阅者
///
/// 只影响当前线程，其他工作线程照常输出。
#[must_use = "QuietScope 被丢弃时立即恢复日志输出"]
pub struct QuietScope {
  guard: Option<DefaultGuard>,
}

impl QuietScope {
  /// `enable` 为假时什么都不做，方便按配置使用
  pub fn enter(enable: bool) -> Self {
    let guard = enable.then(|| tracing::subscriber::set_default(NoSubscriber::default()));
    Self { guard }
  }

  pub fn is_active(&self) -> bool {
    self.guard.is_some()
  }
}

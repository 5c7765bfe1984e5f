//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Time** → build.rs 中由 vergen 生成

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 构建时间（由 vergen 在 build.rs 中生成，生成失败时为 "unknown"）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// 用于日志打印的版本摘要
pub fn version_summary() -> String {
    format!("chatterbox-sdk {} (build {})", SDK_VERSION, BUILD_TIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_summary_contains_semver() {
        let summary = version_summary();
        assert!(summary.contains(SDK_VERSION));
        assert!(!BUILD_TIME.is_empty());
    }
}

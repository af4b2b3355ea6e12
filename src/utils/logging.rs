/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化日志
///
/// `RUST_LOG` 优先；否则默认 `info`，详细模式下为 `debug`。
/// 重复初始化（例如测试中）会被忽略。
///
/// # 参数
/// - `verbose`: 是否显示详细日志
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 作业评分与对账");
    info!("📁 作业目录: {}", config.assignments_dir.display());
    info!("📜 策略文件: {}", config.policy_file.display());
    info!("📊 最大并发评分数: {}", config.max_concurrent_grades);
    info!("{}", "=".repeat(60));
}

/// 记录扫描结果
///
/// # 参数
/// - `routes`: 路线数
/// - `submissions`: 当前提交数
/// - `unresolved`: 无法识别身份的文件数
pub fn log_scan_complete(routes: usize, submissions: usize, unresolved: usize) {
    info!("✓ 找到 {} 条路线，{} 份当前提交", routes, submissions);
    if unresolved > 0 {
        info!("⚠️ {} 个文件无法识别学生身份，已写入警告文件", unresolved);
    }
}

/// 记录批次开始信息
///
/// # 参数
/// - `route`: 路线标识
/// - `total`: 本批提交数
/// - `max_concurrent`: 最大并发数
pub fn log_batch_start(route: &str, total: usize, max_concurrent: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始评分路线 {}", route);
    info!("📄 本批提交: {} 份 | 并发: {}", total, max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(route: &str, graded: usize, skipped: usize, failed: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 路线 {} 完成: 新评分 {} | 跳过 {} | 失败 {}",
        route, graded, skipped, failed
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `graded`: 新评分数量
/// - `skipped`: 已有成绩而跳过的数量
/// - `failed`: 失败数量
/// - `total`: 总数
pub fn print_final_stats(graded: usize, skipped: usize, failed: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部评分完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 新评分: {}/{}", graded, total);
    info!("⏭ 跳过: {}", skipped);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("评分完成", 2), "评分...");
        assert_eq!(truncate_text("ok", 5), "ok");
    }
}

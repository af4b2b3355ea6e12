use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use route_grader::models::{RouteId, RouteLayout, StudentId};
use route_grader::reconcile::ReportView;
use route_grader::services::ExerciseExtractor;
use route_grader::utils::logging;
use route_grader::{App, BatchReport, Config, GradeOutcome};

/// 作业评分与对账工具
#[derive(Debug, Parser)]
#[command(name = "route-grader", version, about = "批量评分学生作业并计算每条路线的完成情况")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 作业根目录（覆盖 ASSIGNMENTS_DIR）
    #[arg(long, global = true)]
    assignments: Option<PathBuf>,

    /// 策略文件（覆盖 POLICY_FILE）
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// 显示详细日志
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 评分单个提交文件
    Grade {
        route: String,
        /// submissions/ 中的文件名
        file: String,
    },
    /// 评分一条路线的所有提交（已评分的版本自动跳过）
    GradeRoute { route: String },
    /// 评分所有有提交的路线
    GradeAll,
    /// 重新计算汇总报告
    Report {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
        /// 外联名单人数
        #[arg(long, default_value_t = 10)]
        lowest: usize,
        /// NEEDS_WORK 次数达到该值的练习列为常见问题
        #[arg(long, default_value_t = 3)]
        min_issues: usize,
    },
    /// 解释某个学生在某条路线上的状态
    Explain { route: String, student: String },
    /// 只解析路线说明，不评分
    ParseRoute { route: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("读取环境变量配置失败")?;
    if let Some(dir) = cli.assignments {
        config.assignments_dir = dir;
    }
    if let Some(path) = cli.policy {
        config.policy_file = path;
    }
    config.verbose_logging |= cli.verbose;

    logging::init(config.verbose_logging);

    tokio::select! {
        result = run(cli.command, config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("⚠️ 收到中断信号，已停止。已写入的成绩保留，重新运行即可继续");
            Ok(())
        }
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::ParseRoute { route } => parse_route(&config, &RouteId::new(route)).await,
        Command::Grade { route, file } => {
            let app = App::new(config).await?;
            match app.grade_one(&RouteId::new(route), &file).await? {
                GradeOutcome::Graded(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                GradeOutcome::Skipped => println!("该版本已有成绩，跳过"),
                GradeOutcome::Failed(e) => anyhow::bail!("评分失败: {}", e),
            }
            Ok(())
        }
        Command::GradeRoute { route } => {
            let app = App::new(config).await?;
            let report = app.grade_route(&RouteId::new(route)).await?;
            print_batch(&report);
            Ok(())
        }
        Command::GradeAll => {
            let app = App::new(config).await?;
            for report in app.grade_all().await? {
                print_batch(&report);
            }
            Ok(())
        }
        Command::Report {
            json,
            lowest,
            min_issues,
        } => {
            let app = App::new(config).await?;
            let report = app.report(lowest).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, min_issues);
            }
            Ok(())
        }
        Command::Explain { route, student } => {
            let app = App::new(config).await?;
            let rec = app.reconcile().await;
            let (route, student) = (RouteId::new(route), StudentId::new(student));
            let entry = rec
                .status(&route, &student)
                .with_context(|| format!("名册中没有 {} / {}", route, student))?;
            println!("{} / {}: {}", route, student, entry.status);
            println!("  规则: {}", entry.reason);
            if let Some(sub) = &entry.submission {
                println!("  提交: {} ({})", sub.file_name, sub.fingerprint.short());
            }
            if let Some(grade) = &entry.grade {
                println!(
                    "  成绩: {} ({}, {})",
                    grade.source_file,
                    grade.source_fingerprint.short(),
                    grade.graded_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
    }
}

async fn parse_route(config: &Config, route: &RouteId) -> Result<()> {
    let layout = RouteLayout::new(&config.assignments_dir);
    let path = layout.instructions_path(route);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("读取 {} 失败", path.display()))?;

    let document = ExerciseExtractor::new()?.parse(route, &content)?;
    info!("路线 {}: {} 个练习", route, document.exercises.len());
    if let Some(title) = &document.title {
        println!("# {}", title);
    }
    for exercise in &document.exercises {
        let marker = if exercise.optional { " [OPTIONAL]" } else { "" };
        match &exercise.title {
            Some(title) => println!("- {}{}: {}", exercise.id, marker, title),
            None => println!("- {}{}", exercise.id, marker),
        }
    }
    Ok(())
}

fn print_batch(report: &BatchReport) {
    println!(
        "路线 {}: 共 {} | 新评分 {} | 跳过 {} | 失败 {}",
        report.route,
        report.total,
        report.graded,
        report.skipped,
        report.failed_count()
    );
    for failed in &report.failed {
        println!("  ❌ {} ({}): {}", failed.student, failed.file_name, failed.error);
    }
}

fn print_report(report: &ReportView, min_issues: usize) {
    println!("{}", "=".repeat(60));
    for stats in &report.routes {
        let mut flags = Vec::new();
        if stats.free_pass {
            flags.push("免评");
        }
        if !stats.active {
            flags.push("无提交");
        }
        println!(
            "路线 {}{}: 完成 {}/{} | 达标 {} | 未达标 {} | 缺交 {} | 达标率 {:.0}%",
            stats.route,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            },
            stats.completed,
            stats.roster_size,
            stats.sent,
            stats.not_sent,
            stats.missing,
            stats.send_rate * 100.0
        );
        if stats.format_mismatches + stats.route_token_mismatches + stats.stale_grades > 0 {
            println!(
                "  格式不符 {} | 路线标记不符 {} | 待重新评分 {} | 孤立成绩 {}",
                stats.format_mismatches,
                stats.route_token_mismatches,
                stats.stale_grades,
                stats.orphaned_grades
            );
        }
        for issue in stats.common_issues(min_issues) {
            println!(
                "  ⚠️ {}: NEEDS_WORK {} 次，通过率 {:.0}%",
                issue.exercise_id,
                issue.needs_work,
                issue.success_rate * 100.0
            );
            for rationale in &issue.sample_rationales {
                println!("      - {}", logging::truncate_text(rationale, 120));
            }
        }
    }

    for (route, reason) in &report.route_failures {
        println!("❌ 路线 {} 无法解析: {}", route, reason);
    }

    let completion = &report.completion;
    println!("{}", "=".repeat(60));
    println!(
        "学生 {} 人 | 路线 {} 条 | 平均完成 {:.1} (最少 {}, 最多 {}) | 平均达标 {:.1}",
        completion.students,
        completion.routes,
        completion.average_completed,
        completion.min_completed,
        completion.max_completed,
        completion.average_sent
    );
    if !report.lowest_completion.is_empty() {
        println!("完成数最少的学生:");
        for student in &report.lowest_completion {
            println!(
                "  {} 完成 {} 达标 {} | 缺交: {}",
                student.student,
                student.completed,
                student.sent,
                student
                    .missing_routes
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}

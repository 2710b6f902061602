// ==========================================
// 教培排课与课时管理引擎 - 主入口
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 排课生成 / 冲突检测 / 课时台账
// ==========================================

use class_schedule_engine::app::{get_default_db_path, AppState};
use class_schedule_engine::logging;

fn main() {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", class_schedule_engine::APP_NAME);
    tracing::info!("系统版本: {}", class_schedule_engine::VERSION);
    tracing::info!("==================================================");

    let (db_path, sweep_date) = parse_args();
    let db_path = db_path.unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let app_state = AppState::new(db_path).expect("无法初始化AppState");

    match sweep_date {
        Some(as_of) => run_sweep(&app_state, &as_of),
        None => {
            tracing::info!("服务装配完成。本程序以库形式嵌入调用方使用,");
            tracing::info!("独立运行时仅支持过期课次清扫: --sweep [YYYY-MM-DD]");
        }
    }
}

/// 解析命令行参数: --db <路径> / --sweep [日期, 缺省今天]
fn parse_args() -> (Option<String>, Option<String>) {
    let args: Vec<String> = std::env::args().collect();
    let mut db_path: Option<String> = None;
    let mut sweep_date: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--sweep" => {
                if i + 1 < args.len() && !args[i + 1].starts_with("--") {
                    sweep_date = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    sweep_date = Some(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string());
                    i += 1;
                }
            }
            other => {
                eprintln!("未知参数: {}", other);
                eprintln!("用法: class-schedule-engine [--db <路径>] [--sweep [YYYY-MM-DD]]");
                std::process::exit(2);
            }
        }
    }
    (db_path, sweep_date)
}

fn run_sweep(app_state: &AppState, as_of: &str) {
    match app_state.schedule_api.complete_overdue(as_of, "cli") {
        Ok(result) => {
            tracing::info!(
                "清扫结束: 完成{}条, 补扣记录{}条, 失败{}条",
                result.completed_count,
                result.records_created,
                result.failures.len()
            );
            for failure in &result.failures {
                tracing::warn!("排课{}清扫失败: {}", failure.schedule_id, failure.error);
            }
        }
        Err(e) => {
            tracing::error!("过期课次清扫失败: {}", e);
            std::process::exit(1);
        }
    }
}

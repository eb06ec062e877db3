// ==========================================
// 考试排程对账系统 - 命令行入口
// ==========================================
// 用法:
//   exam-reconcile <file> [db_path]        导入排程文件并输出运行报告（JSON）
//   exam-reconcile sync-links [db_path]    仓储内同组链接补全
//   exam-reconcile rooms [db_path]         输出考场清单（JSON）
// 说明: 日志输出到 stderr, stdout 只输出 JSON
// 环境变量: EXAM_RECONCILE_DB_PATH / EXAM_RECONCILE_LOG_JSON / RUST_LOG
// ==========================================

use anyhow::{bail, Context};
use exam_reconcile::config::ConfigManager;
use exam_reconcile::db::{default_db_path, init_schema, open_sqlite_connection};
use exam_reconcile::domain::ImportProgress;
use exam_reconcile::engine::RoomRoster;
use exam_reconcile::importer::{ScheduleImporter, ScheduleImporterImpl};
use exam_reconcile::repository::{ExamRecordRepositoryImpl, RecordStore};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // EXAM_RECONCILE_LOG_JSON=1 时输出 JSON 行日志
    match std::env::var("EXAM_RECONCILE_LOG_JSON") {
        Ok(v) if v == "1" || v.eq_ignore_ascii_case("true") => exam_reconcile::logging::init_json(),
        _ => exam_reconcile::logging::init(),
    }

    let mut args = std::env::args().skip(1);
    let command = match args.next() {
        Some(arg) => arg,
        None => bail!("用法: exam-reconcile <file|sync-links|rooms> [db_path]"),
    };
    let db_path = args.next().unwrap_or_else(default_db_path);

    tracing::info!(
        version = exam_reconcile::VERSION,
        db_path = %db_path,
        "{}",
        exam_reconcile::APP_NAME
    );

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    init_schema(&conn).context("数据库建表失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let store = Arc::new(ExamRecordRepositoryImpl::from_connection(conn.clone())?);
    let config = ConfigManager::from_connection(conn)?;

    let importer = ScheduleImporterImpl::new(store.clone(), config).with_progress(Arc::new(
        |p: ImportProgress| {
            eprint!("\r进度 {}/{}", p.done, p.total);
            if p.done == p.total {
                eprintln!();
            }
            let _ = std::io::stderr().flush();
        },
    ));

    let output = match command.as_str() {
        "sync-links" => {
            let executor = importer.executor().await?;
            serde_json::to_string_pretty(&executor.sync_links().await)?
        }
        "rooms" => {
            let records = store.list_all().await?;
            let roster = RoomRoster::from_records(&records);
            serde_json::to_string_pretty(roster.rooms())?
        }
        file => {
            let path = PathBuf::from(file);
            let report = importer
                .import_file(&path)
                .await
                .with_context(|| format!("导入失败: {}", path.display()))?;
            serde_json::to_string_pretty(&report)?
        }
    };

    println!("{}", output);
    Ok(())
}

// ==========================================
// 考试排程对账系统 - 导入层
// ==========================================
// 职责: 排程表格 → 导入片段 → 与记录仓储对账
// 支持: Excel (xlsx/xls/ods), CSV
// 流程: 解码 → 表头映射 → 行规范化 → 执行器 → 诊断
// ==========================================

// 模块声明
pub mod conflict_handler;
pub mod data_cleaner;
pub mod date_normalizer;
pub mod diagnostics;
pub mod error;
pub mod file_parser;
pub mod header_mapper;
pub mod import_executor;
pub mod row_canonicalizer;
pub mod schedule_importer;

// 重导出核心类型
pub use conflict_handler::ConflictHandler;
pub use date_normalizer::{normalize_date, DateInput, DateOptions};
pub use diagnostics::{build_report, DiagnosticsReporter};
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, DecodedTable, ExcelParser, FileParser, UniversalFileParser};
pub use header_mapper::{HeaderMap, HeaderMapper};
pub use import_executor::{CancelFlag, ImportExecutor, ProgressCallback};
pub use row_canonicalizer::RowCanonicalizer;
pub use schedule_importer::{prepare_table, PreparedImport, ScheduleImporter, ScheduleImporterImpl};

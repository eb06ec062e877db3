// ==========================================
// 考试排程对账系统 - 核心库
// ==========================================
// 职责: 考试排程表格导入,与已有考生记录去重/补全/链接传播
// 技术栈: Rust + SQLite
// 系统定位: 对账支持（只补空字段,冲突交给操作员）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 匹配与传播规则
pub mod engine;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{FragmentState, IdentityTier, LinkMatchStrategy, SourceFormat};

// 领域实体
pub use domain::{
    CanonicalField, ExamRecord, FieldPatch, ImportProgress, ImportReport, RecordFragment,
    RowAction, RowOutcome,
};

// 引擎
pub use engine::{
    compute_pending_link_updates, LinkPropagator, RecordMatcher, RoomRoster, SnapshotIndex,
};

// 导入
pub use importer::{
    CancelFlag, HeaderMapper, ImportError, ImportExecutor, ImportResult, ScheduleImporter,
    ScheduleImporterImpl,
};

// 配置
pub use config::{ConfigManager, ImportConfig, ImportConfigReader};

// 仓储
pub use repository::{ExamRecordRepositoryImpl, InMemoryRecordStore, RecordStore, RepositoryError};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "考试排程对账系统";

// ==========================================
// 考试排程对账系统 - 配置层
// ==========================================
// 职责: 导入配置加载,支持 config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config;
pub mod import_config_trait;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use import_config::{ImportConfig, SessionTimeslots};
pub use import_config_trait::ImportConfigReader;

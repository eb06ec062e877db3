// ==========================================
// 考试排程对账系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (scope_id + key → value)
// ==========================================

use crate::config::import_config::{
    ImportConfig, SessionTimeslots, DEFAULT_CONCURRENCY, DEFAULT_MARKER_SHEET,
};
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;
        crate::db::init_schema(&conn).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        {
            let guard = Self::lock(&conn, "*")?;
            configure_sqlite_connection(&guard).map_err(|e| ImportError::ConfigReadError {
                key: "*".to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(Self { conn })
    }

    fn lock<'a>(
        conn: &'a Arc<Mutex<Connection>>,
        key: &str,
    ) -> ImportResult<MutexGuard<'a, Connection>> {
        conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: format!("锁获取失败: {}", e),
        })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = Self::lock(&self.conn, key)?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE, key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ImportError::ConfigReadError {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = Self::lock(&self.conn, key)?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3",
            params![GLOBAL_SCOPE, key, value],
        )
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> ImportResult<String> {
        Ok(self
            .get_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> ImportResult<bool> {
        let value = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ImportError::ConfigValueError {
                key: key.to_string(),
                value,
                message: "应为 true/false".to_string(),
            }),
        }
    }
}

// ==========================================
// ImportConfigReader 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_concurrency(&self) -> ImportResult<usize> {
        let value = self.get_config_or_default(
            config_keys::IMPORT_CONCURRENCY,
            &DEFAULT_CONCURRENCY.to_string(),
        )?;
        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|e| ImportError::ConfigValueError {
                key: config_keys::IMPORT_CONCURRENCY.to_string(),
                value: value.clone(),
                message: e.to_string(),
            })?;
        Ok(ImportConfig::clamp_concurrency(parsed))
    }

    async fn get_marker_sheet_name(&self) -> ImportResult<String> {
        let value =
            self.get_config_or_default(config_keys::MARKER_SHEET_NAME, DEFAULT_MARKER_SHEET)?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Ok(DEFAULT_MARKER_SHEET.to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }

    async fn get_relaxed_room_digits(&self) -> ImportResult<bool> {
        self.get_bool_or_default(config_keys::RELAXED_ROOM_DIGITS, true)
    }

    async fn get_create_new_sittings(&self) -> ImportResult<bool> {
        self.get_bool_or_default(config_keys::CREATE_NEW_SITTINGS, false)
    }

    async fn get_csv_delimiter(&self) -> ImportResult<Option<u8>> {
        let value = match self.get_config_value(config_keys::CSV_DELIMITER)? {
            Some(v) => v,
            None => return Ok(None),
        };
        match value.as_str() {
            "" => Ok(None),
            "\\t" | "tab" => Ok(Some(b'\t')),
            single if single.len() == 1 && single.is_ascii() => Ok(single.bytes().next()),
            _ => Err(ImportError::ConfigValueError {
                key: config_keys::CSV_DELIMITER.to_string(),
                value,
                message: "分隔符应为单个 ASCII 字符".to_string(),
            }),
        }
    }

    async fn get_session_timeslots(&self) -> ImportResult<SessionTimeslots> {
        let value = match self.get_config_value(config_keys::SESSION_TIMESLOTS)? {
            Some(v) => v,
            None => return Ok(SessionTimeslots::default()),
        };
        serde_json::from_str(&value).map_err(|e| ImportError::ConfigValueError {
            key: config_keys::SESSION_TIMESLOTS.to_string(),
            value,
            message: e.to_string(),
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 执行
    pub const IMPORT_CONCURRENCY: &str = "import_concurrency";

    // 解码
    pub const MARKER_SHEET_NAME: &str = "import_marker_sheet";
    pub const CSV_DELIMITER: &str = "import_csv_delimiter";

    // 匹配策略
    pub const RELAXED_ROOM_DIGITS: &str = "link_relaxed_room_digits";
    pub const CREATE_NEW_SITTINGS: &str = "import_create_new_sittings";

    // 场次时间段 (JSON: {"1": "7h00-8h30", ...})
    pub const SESSION_TIMESLOTS: &str = "session_timeslots";
}

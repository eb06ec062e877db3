// ==========================================
// 考试排程对账系统 - 导入配置
// ==========================================
// 职责: 单次导入运行所需的全部参数（含默认值）
// 说明: 配置在运行开始时一次性加载,作为参数注入执行器,
//       执行期间不读取任何全局状态
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 默认并发度
pub const DEFAULT_CONCURRENCY: usize = 6;
/// 并发度上限
pub const MAX_CONCURRENCY: usize = 32;
/// 多工作表时默认要求的工作表名
pub const DEFAULT_MARKER_SHEET: &str = "Data";

// ==========================================
// SessionTimeslots - 场次 → 时间段
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTimeslots(BTreeMap<u8, String>);

impl Default for SessionTimeslots {
    fn default() -> Self {
        let slots = [
            (1, "7h00-8h30"),
            (2, "9h00-10h30"),
            (3, "13h00-14h30"),
            (4, "15h00-16h30"),
            (5, "17h30-19h00"),
            (6, "19h30-21h00"),
        ];
        Self(
            slots
                .iter()
                .map(|(k, v)| (*k, v.to_string()))
                .collect(),
        )
    }
}

impl SessionTimeslots {
    pub fn new(slots: BTreeMap<u8, String>) -> Self {
        Self(slots)
    }

    pub fn get(&self, ordinal: u8) -> Option<&str> {
        self.0.get(&ordinal).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ==========================================
// ImportConfig - 导入配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConfig {
    /// 同时在途的仓储写操作上限
    pub concurrency: usize,
    /// 多工作表时选择的工作表名（不区分大小写）
    pub marker_sheet_name: String,
    /// 宽松链接匹配时允许 "Phòng 101" 与 "101" 视为同一考场
    pub relaxed_room_digits: bool,
    /// 身份命中但场次不同时是否新建记录
    pub create_new_sittings: bool,
    /// CSV 固定分隔符; None 时嗅探
    #[serde(default)]
    pub csv_delimiter: Option<u8>,
    pub session_timeslots: SessionTimeslots,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            marker_sheet_name: DEFAULT_MARKER_SHEET.to_string(),
            relaxed_room_digits: true,
            create_new_sittings: false,
            csv_delimiter: None,
            session_timeslots: SessionTimeslots::default(),
        }
    }
}

impl ImportConfig {
    /// 并发度钳制到 1..=32
    pub fn clamp_concurrency(value: usize) -> usize {
        value.clamp(1, MAX_CONCURRENCY)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Self::clamp_concurrency(concurrency);
        self
    }

    pub fn effective_concurrency(&self) -> usize {
        Self::clamp_concurrency(self.concurrency)
    }
}

// 静态配置直接作为读取器使用
#[async_trait]
impl ImportConfigReader for ImportConfig {
    async fn get_concurrency(&self) -> ImportResult<usize> {
        Ok(self.effective_concurrency())
    }

    async fn get_marker_sheet_name(&self) -> ImportResult<String> {
        Ok(self.marker_sheet_name.clone())
    }

    async fn get_relaxed_room_digits(&self) -> ImportResult<bool> {
        Ok(self.relaxed_room_digits)
    }

    async fn get_create_new_sittings(&self) -> ImportResult<bool> {
        Ok(self.create_new_sittings)
    }

    async fn get_csv_delimiter(&self) -> ImportResult<Option<u8>> {
        Ok(self.csv_delimiter)
    }

    async fn get_session_timeslots(&self) -> ImportResult<SessionTimeslots> {
        Ok(self.session_timeslots.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ImportConfig::default();
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.marker_sheet_name, "Data");
        assert!(config.relaxed_room_digits);
        assert!(!config.create_new_sittings);
        assert_eq!(config.session_timeslots.get(1), Some("7h00-8h30"));
        assert_eq!(config.session_timeslots.get(6), Some("19h30-21h00"));
        assert_eq!(config.session_timeslots.get(7), None);
    }

    #[test]
    fn test_concurrency_clamped() {
        assert_eq!(ImportConfig::default().with_concurrency(0).concurrency, 1);
        assert_eq!(ImportConfig::default().with_concurrency(100).concurrency, 32);
        assert_eq!(ImportConfig::default().with_concurrency(8).concurrency, 8);
    }

    #[tokio::test]
    async fn test_static_reader_roundtrip() {
        let config = ImportConfig::default().with_concurrency(3);
        let loaded = config.load_import_config().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_timeslots_deserialize_from_json_object() {
        let slots: SessionTimeslots =
            serde_json::from_str(r#"{"1":"7h30-9h00","2":"9h30-11h00"}"#).unwrap();
        assert_eq!(slots.get(1), Some("7h30-9h00"));
        assert_eq!(slots.len(), 2);
    }
}

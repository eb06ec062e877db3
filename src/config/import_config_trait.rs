// ==========================================
// 考试排程对账系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::import_config::{ImportConfig, SessionTimeslots};
use crate::importer::error::ImportResult;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）, ImportConfig（静态配置）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 获取并发度
    ///
    /// # 默认值
    /// - 6（钳制到 1..=32）
    async fn get_concurrency(&self) -> ImportResult<usize>;

    /// 获取多工作表时要求的工作表名
    ///
    /// # 默认值
    /// - "Data"
    async fn get_marker_sheet_name(&self) -> ImportResult<String>;

    /// 宽松链接匹配是否允许考场数字等价
    ///
    /// # 默认值
    /// - true
    async fn get_relaxed_room_digits(&self) -> ImportResult<bool>;

    /// 身份命中但场次不同时是否新建
    ///
    /// # 默认值
    /// - false（报告为无法匹配）
    async fn get_create_new_sittings(&self) -> ImportResult<bool>;

    /// CSV 固定分隔符
    ///
    /// # 默认值
    /// - None（按表头行嗅探）
    async fn get_csv_delimiter(&self) -> ImportResult<Option<u8>>;

    /// 场次 → 时间段表
    async fn get_session_timeslots(&self) -> ImportResult<SessionTimeslots>;

    /// 一次性加载完整导入配置
    async fn load_import_config(&self) -> ImportResult<ImportConfig> {
        Ok(ImportConfig {
            concurrency: self.get_concurrency().await?,
            marker_sheet_name: self.get_marker_sheet_name().await?,
            relaxed_room_digits: self.get_relaxed_room_digits().await?,
            create_new_sittings: self.get_create_new_sittings().await?,
            csv_delimiter: self.get_csv_delimiter().await?,
            session_timeslots: self.get_session_timeslots().await?,
        })
    }
}

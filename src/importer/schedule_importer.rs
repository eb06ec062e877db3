// ==========================================
// 考试排程对账系统 - 排程文件导入器
// ==========================================
// 职责: 整合导入流程,从文件到记录仓储
// 流程: 读配置 → 解码 → 表头映射 → 行规范化 → 执行器 → 运行报告
// 红线: 输入级错误（空文件/缺工作表/无数据行/无必需表头）在触碰仓储前中止
// ==========================================

use crate::config::{ImportConfig, ImportConfigReader};
use crate::domain::record::RecordFragment;
use crate::domain::report::{HeaderDiagnostics, ImportReport};
use crate::domain::types::SourceFormat;
use crate::importer::date_normalizer::DateOptions;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{DecodedTable, UniversalFileParser};
use crate::importer::header_mapper::HeaderMapper;
use crate::importer::import_executor::{CancelFlag, ImportExecutor, ProgressCallback};
use crate::importer::row_canonicalizer::RowCanonicalizer;
use crate::repository::record_store::RecordStore;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ==========================================
// ScheduleImporter Trait
// ==========================================
#[async_trait]
pub trait ScheduleImporter: Send + Sync {
    /// 从文件导入（按扩展名选择解码器）
    ///
    /// # 返回
    /// - Ok(ImportReport): 运行报告（行级问题都在报告里）
    /// - Err(ImportError): 输入级致命错误,仓储未被触碰
    async fn import_file(&self, file_path: &Path) -> ImportResult<ImportReport>;

    /// 从内存字节导入
    async fn import_bytes(&self, bytes: &[u8], format: SourceFormat) -> ImportResult<ImportReport>;
}

/// 解码 + 规范化之后、执行之前的中间结果
#[derive(Debug, Clone)]
pub struct PreparedImport {
    pub fragments: Vec<RecordFragment>,
    pub headers: HeaderDiagnostics,
}

/// 表格 → 导入片段
///
/// # 错误
/// - NoUsableRows: 表头之后没有非空行
/// - NoRequiredHeaders: 没有任何身份/分组表头
pub fn prepare_table(
    mapper: &HeaderMapper,
    table: &DecodedTable,
    config: &ImportConfig,
) -> ImportResult<PreparedImport> {
    if table.rows.is_empty() {
        return Err(ImportError::NoUsableRows);
    }

    let header_map = mapper.build_header_map(&table.headers);
    if !header_map.has_required() {
        return Err(ImportError::NoRequiredHeaders {
            headers: table.headers.clone(),
        });
    }

    let diagnostics = header_map.diagnostics().clone();
    if !diagnostics.unmapped.is_empty() {
        warn!(unmapped = ?diagnostics.unmapped, "未识别的表头已忽略");
    }
    if !diagnostics.shadowed.is_empty() {
        warn!(shadowed = ?diagnostics.shadowed, "同一字段存在多列,仅使用第一列");
    }
    debug!(
        mapped = diagnostics.mapped.len(),
        ignored = diagnostics.ignored.len(),
        "表头映射完成"
    );

    let canonicalizer = RowCanonicalizer::new(
        header_map,
        DateOptions {
            use_alternate_epoch: table.metadata.alternate_epoch,
        },
        config.session_timeslots.clone(),
    );
    let fragments: Vec<RecordFragment> = table
        .rows
        .iter()
        .map(|row| canonicalizer.canonicalize(row))
        .collect();

    Ok(PreparedImport {
        fragments,
        headers: diagnostics,
    })
}

// ==========================================
// ScheduleImporterImpl
// ==========================================
pub struct ScheduleImporterImpl<C>
where
    C: ImportConfigReader,
{
    // 记录仓储
    store: Arc<dyn RecordStore>,

    // 配置读取器
    config: C,

    header_mapper: HeaderMapper,
    progress: Option<ProgressCallback>,
    cancel: CancelFlag,
}

impl<C> ScheduleImporterImpl<C>
where
    C: ImportConfigReader,
{
    pub fn new(store: Arc<dyn RecordStore>, config: C) -> Self {
        Self {
            store,
            config,
            header_mapper: HeaderMapper::new(),
            progress: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_header_mapper(mut self, header_mapper: HeaderMapper) -> Self {
        self.header_mapper = header_mapper;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 取消句柄（与后续运行共享）
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// 按当前配置构造执行器（也用于链接同步）
    pub async fn executor(&self) -> ImportResult<ImportExecutor> {
        let config = self.config.load_import_config().await?;
        Ok(self.executor_with(config))
    }

    fn executor_with(&self, config: ImportConfig) -> ImportExecutor {
        let executor = ImportExecutor::new(self.store.clone(), config)
            .with_cancel_flag(self.cancel.clone());
        match &self.progress {
            Some(progress) => executor.with_progress(progress.clone()),
            None => executor,
        }
    }

    fn parser_for(config: &ImportConfig) -> UniversalFileParser {
        UniversalFileParser::new(config.csv_delimiter, config.marker_sheet_name.clone())
    }

    async fn execute(
        &self,
        table: DecodedTable,
        config: ImportConfig,
    ) -> ImportResult<ImportReport> {
        info!(
            rows = table.rows.len(),
            sheet = ?table.metadata.sheet_name,
            alternate_epoch = table.metadata.alternate_epoch,
            "文件解码完成"
        );
        let prepared = prepare_table(&self.header_mapper, &table, &config)?;
        let executor = self.executor_with(config);
        Ok(executor
            .run_with_headers(prepared.fragments, Some(prepared.headers))
            .await)
    }
}

#[async_trait]
impl<C> ScheduleImporter for ScheduleImporterImpl<C>
where
    C: ImportConfigReader,
{
    #[instrument(skip(self, file_path), fields(file = %file_path.display()))]
    async fn import_file(&self, file_path: &Path) -> ImportResult<ImportReport> {
        let config = self.config.load_import_config().await?;
        let table = Self::parser_for(&config).parse(file_path)?;
        self.execute(table, config).await
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn import_bytes(&self, bytes: &[u8], format: SourceFormat) -> ImportResult<ImportReport> {
        let config = self.config.load_import_config().await?;
        let table = Self::parser_for(&config).decode(bytes, format)?;
        self.execute(table, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory_store::InMemoryRecordStore;

    fn importer(store: Arc<InMemoryRecordStore>) -> ScheduleImporterImpl<ImportConfig> {
        ScheduleImporterImpl::new(store, ImportConfig::default())
    }

    #[tokio::test]
    async fn test_import_csv_bytes_creates_records() {
        let store = Arc::new(InMemoryRecordStore::new());
        let csv = "STT,Mã SV,Họ và tên,Ngày thi,Môn thi,Ca thi,Phòng thi\n\
                   1,SV01,Nguyễn Văn A,01/05/2024,Toán,Ca 1,P101\n\
                   2,SV02,Trần Thị B,01/05/2024,Toán,Ca 1,P101\n";

        let report = importer(store.clone())
            .import_bytes(csv.as_bytes(), SourceFormat::Csv)
            .await
            .unwrap();

        assert_eq!(report.created_count, 2);
        assert_eq!(store.len().await, 2);
        let headers = report.headers.unwrap();
        assert!(headers.ignored.contains(&"STT".to_string()));
    }

    #[tokio::test]
    async fn test_no_required_headers_is_fatal() {
        let store = Arc::new(InMemoryRecordStore::new());
        let csv = "Ghi chú,Khác\nabc,def\n";

        let err = importer(store.clone())
            .import_bytes(csv.as_bytes(), SourceFormat::Csv)
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::NoRequiredHeaders { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_header_only_file_has_no_usable_rows() {
        let store = Arc::new(InMemoryRecordStore::new());
        let err = importer(store)
            .import_bytes("Mã SV,Họ và tên\n".as_bytes(), SourceFormat::Csv)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::NoUsableRows));
    }
}

// ==========================================
// 考试排程对账系统 - 导入执行器
// ==========================================
// 职责: 片段序列 × 记录仓储 → 分类 + 应用 + 运行报告
// 流程: 快照（一次） → 文件内去重 → 工作池并发处理 → 诊断汇总
// 状态机: Pending → Classified → Applied | Skipped | Failed
// 红线: run() 永不返回错误,所有失败进入报告
// 红线: 写入前重读实时记录,只填空字段,绝不覆盖非空值
// ==========================================

use crate::config::ImportConfig;
use crate::domain::record::{CanonicalField, FieldPatch, RecordFragment};
use crate::domain::report::{
    HeaderDiagnostics, ImportProgress, ImportReport, LinkConflict, RowAction, RowOutcome,
};
use crate::domain::types::{FragmentState, IdentityTier, LinkMatchStrategy};
use crate::engine::link_propagator::{LinkPropagation, LinkPropagator};
use crate::engine::link_sync::{compute_pending_link_updates, PendingLinkUpdate};
use crate::engine::matcher::{MatchDecision, MatchPolicy, RecordMatcher, SnapshotIndex};
use crate::importer::conflict_handler::ConflictHandler;
use crate::importer::diagnostics::DiagnosticsReporter;
use crate::repository::error::RepositoryResult;
use crate::repository::record_store::RecordStore;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 进度回调（每行完成后调用）
pub type ProgressCallback = Arc<dyn Fn(ImportProgress) + Send + Sync>;

// ==========================================
// CancelFlag - 取消句柄
// ==========================================
// 置位后不再派发新片段; 已派发的片段照常完成,不回滚
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ==========================================
// RecordLocks - 单记录写锁
// ==========================================
// 同一记录的 "重读 → 判空 → 写入" 串行执行
#[derive(Default)]
struct RecordLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RecordLocks {
    fn handle(&self, record_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(record_id.to_string()).or_default().clone()
    }
}

/// 单次运行共享的只读上下文
#[derive(Clone, Copy)]
struct RunContext<'a> {
    index: &'a SnapshotIndex,
    in_file_duplicates: &'a HashMap<usize, usize>,
    locks: &'a RecordLocks,
}

/// 单条链接写入结果
enum LinkWrite {
    Written,
    AlreadySet,
    Conflict(String),
    Vanished,
}

fn outcome(row_number: usize, state: FragmentState, action: RowAction) -> RowOutcome {
    debug_assert!(
        FragmentState::Classified.can_transition_to(state)
            || FragmentState::Pending.can_transition_to(state)
    );
    RowOutcome::new(row_number, state, action)
}

fn failed(row_number: usize, message: String) -> RowOutcome {
    outcome(row_number, FragmentState::Failed, RowAction::Failed { message })
}

// ==========================================
// ImportExecutor
// ==========================================
pub struct ImportExecutor {
    store: Arc<dyn RecordStore>,
    config: ImportConfig,
    matcher: RecordMatcher,
    propagator: LinkPropagator,
    progress: Option<ProgressCallback>,
    cancel: CancelFlag,
}

impl ImportExecutor {
    /// 创建执行器
    ///
    /// # 参数
    /// - store: 记录仓储（外部注入）
    /// - config: 导入配置（并发度 / 宽松匹配 / 新建策略）
    pub fn new(store: Arc<dyn RecordStore>, config: ImportConfig) -> Self {
        let matcher = RecordMatcher::new(MatchPolicy {
            create_new_sittings: config.create_new_sittings,
        });
        let propagator = LinkPropagator::new(config.relaxed_room_digits);
        Self {
            store,
            config,
            matcher,
            propagator,
            progress: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// 执行导入
    pub async fn run(&self, fragments: Vec<RecordFragment>) -> ImportReport {
        self.run_with_headers(fragments, None).await
    }

    /// 执行导入（附带表头诊断）
    #[instrument(skip(self, fragments, headers), fields(run_id = tracing::field::Empty))]
    pub async fn run_with_headers(
        &self,
        mut fragments: Vec<RecordFragment>,
        headers: Option<HeaderDiagnostics>,
    ) -> ImportReport {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let total = fragments.len();
        info!(
            run_id = %run_id,
            total = total,
            concurrency = self.config.effective_concurrency(),
            "开始对账导入"
        );
        let mut reporter = DiagnosticsReporter::new(&run_id, total).with_headers(headers);

        // === 步骤 1: 记录快照（整次运行只读一次）===
        let snapshot = match self.store.list_all().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "记录快照读取失败,本次运行未写入");
                reporter.record_run_error(format!("记录快照读取失败: {}", e));
                return reporter.finish(false, start_time.elapsed());
            }
        };
        let index = SnapshotIndex::build(snapshot);

        // === 步骤 2: 文件内重复检测 ===
        let in_file_duplicates = ConflictHandler.detect_duplicates(&fragments);
        ConflictHandler.merge_duplicates(&mut fragments, &in_file_duplicates);
        debug!(
            snapshot = index.len(),
            in_file_duplicates = in_file_duplicates.len(),
            "快照就绪"
        );

        // === 步骤 3: 工作池并发处理 ===
        let locks = RecordLocks::default();
        let ctx = RunContext {
            index: &index,
            in_file_duplicates: &in_file_duplicates,
            locks: &locks,
        };
        let fragments_ref = &fragments;
        let slots = self
            .drive(total, move |idx| self.process_fragment(&fragments_ref[idx], ctx))
            .await;

        // === 步骤 4: 诊断汇总 ===
        for (fragment, slot) in fragments.iter().zip(slots) {
            let row_outcome = slot.unwrap_or_else(|| {
                let mut cancelled = RowOutcome::new(
                    fragment.row_number,
                    FragmentState::Pending,
                    RowAction::Cancelled,
                );
                cancelled.raw_cells = fragment.raw_cells.clone();
                cancelled
            });
            reporter.record(&row_outcome);
        }
        let report = reporter.finish(false, start_time.elapsed());

        info!(
            run_id = %run_id,
            processed = report.processed_count,
            created = report.created_count,
            updated = report.updated_count,
            duplicates = report.duplicate_count,
            link_updated = report.link_updated_count,
            skipped = report.skipped_count,
            no_match = report.no_match_count,
            errors = report.error_count,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "对账导入完成"
        );
        report
    }

    /// 仓储内链接同步: 同组已有链接补到空链接记录
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn sync_links(&self) -> ImportReport {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let records = match self.store.list_all().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "记录快照读取失败,链接同步未执行");
                let mut reporter = DiagnosticsReporter::new(&run_id, 0);
                reporter.record_run_error(format!("记录快照读取失败: {}", e));
                return reporter.finish(false, start_time.elapsed());
            }
        };

        let plan = compute_pending_link_updates(&records);
        let total = plan.updates.len();
        info!(
            run_id = %run_id,
            pending = total,
            ambiguous_groups = plan.ambiguous_groups.len(),
            "开始链接同步"
        );

        let mut reporter =
            DiagnosticsReporter::new(&run_id, total + plan.ambiguous_groups.len());
        let locks = RecordLocks::default();
        let updates = &plan.updates;
        let locks_ref = &locks;
        let slots = self
            .drive(total, move |idx| self.sync_one(idx + 1, &updates[idx], locks_ref))
            .await;

        for (idx, slot) in slots.into_iter().enumerate() {
            let row_outcome = slot.unwrap_or_else(|| {
                RowOutcome::new(idx + 1, FragmentState::Pending, RowAction::Cancelled)
            });
            reporter.record(&row_outcome);
        }
        for (offset, group) in plan.ambiguous_groups.iter().enumerate() {
            warn!(group = %group, "组内存在多个不同链接,跳过同步");
            reporter.record(&outcome(
                total + offset + 1,
                FragmentState::Skipped,
                RowAction::NoMatch {
                    key: group.clone(),
                    reason: "组内存在多个不同链接,无法确定来源".to_string(),
                },
            ));
        }

        let report = reporter.finish(false, start_time.elapsed());
        info!(
            run_id = %run_id,
            link_updated = report.link_updated_count,
            errors = report.error_count,
            cancelled = report.cancelled,
            "链接同步完成"
        );
        report
    }
}

// 工作池与单行处理
impl ImportExecutor {
    /// 固定大小工作池,从共享游标取任务
    ///
    /// 所有 worker 在同一任务内协作调度（join_all）,
    /// 同时在途的仓储操作不超过并发度
    async fn drive<F, Fut>(&self, total: usize, work: F) -> Vec<Option<RowOutcome>>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = RowOutcome>,
    {
        let cursor = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let workers = self.config.effective_concurrency().min(total).max(1);
        self.emit_progress(0, total);

        let tasks = (0..workers).map(|worker| {
            let (cursor, done, work) = (&cursor, &done, &work);
            async move {
                let mut finished = Vec::new();
                loop {
                    if self.cancel.is_cancelled() {
                        debug!(worker = worker, "收到取消信号,停止派发");
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= total {
                        break;
                    }
                    let row_outcome = work(idx).await;
                    let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit_progress(completed, total);
                    finished.push((idx, row_outcome));
                }
                finished
            }
        });

        let mut slots: Vec<Option<RowOutcome>> = vec![None; total];
        for (idx, row_outcome) in join_all(tasks).await.into_iter().flatten() {
            slots[idx] = Some(row_outcome);
        }
        slots
    }

    fn emit_progress(&self, done: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(ImportProgress { done, total });
        }
    }

    async fn process_fragment(&self, fragment: &RecordFragment, ctx: RunContext<'_>) -> RowOutcome {
        let mut row_outcome = self.classify_and_apply(fragment, ctx).await;
        row_outcome.raw_cells = fragment.raw_cells.clone();
        row_outcome
    }

    async fn classify_and_apply(
        &self,
        fragment: &RecordFragment,
        ctx: RunContext<'_>,
    ) -> RowOutcome {
        let row_number = fragment.row_number;

        // 行级校验失败: Pending → Failed
        if !fragment.validation_errors.is_empty() {
            warn!(row_number = row_number, errors = ?fragment.validation_errors, "行级校验失败");
            return outcome(
                row_number,
                FragmentState::Failed,
                RowAction::Invalid {
                    message: fragment.validation_errors.join("; "),
                },
            );
        }

        if let Some(first_row) = ctx.in_file_duplicates.get(&row_number) {
            debug!(row_number = row_number, first_row = *first_row, "文件内重复行");
            return outcome(
                row_number,
                FragmentState::Skipped,
                RowAction::Duplicate {
                    record_id: None,
                    via: None,
                    in_file: true,
                },
            );
        }

        if fragment.is_link_group_row() {
            return self.apply_link_group(fragment, ctx).await;
        }

        match self.matcher.classify(fragment, ctx.index) {
            MatchDecision::SkipNoKey => {
                info!(row_number = row_number, "行无身份/分组字段,跳过");
                outcome(row_number, FragmentState::Skipped, RowAction::SkippedNoKey)
            }
            MatchDecision::Duplicate {
                record_id,
                via,
                conflicting_link,
            } => {
                let mut row_outcome = outcome(
                    row_number,
                    FragmentState::Skipped,
                    RowAction::Duplicate {
                        record_id: Some(record_id.clone()),
                        via: Some(via),
                        in_file: false,
                    },
                );
                if let Some((existing_link, incoming_link)) = conflicting_link {
                    warn!(
                        row_number = row_number,
                        record_id = %record_id,
                        "链接已存在且不同,跳过"
                    );
                    row_outcome.link_conflicts.push(LinkConflict {
                        record_id,
                        existing_link,
                        incoming_link,
                    });
                }
                row_outcome
            }
            MatchDecision::NoMatch { key, reason } => {
                info!(row_number = row_number, key = %key, reason = %reason, "无法匹配");
                outcome(
                    row_number,
                    FragmentState::Skipped,
                    RowAction::NoMatch { key, reason },
                )
            }
            MatchDecision::Create => self.create_record(fragment).await,
            MatchDecision::Update {
                record_id,
                patch,
                via,
            } => {
                self.update_record(fragment, &record_id, &patch, via, ctx.locks)
                    .await
            }
        }
    }

    async fn create_record(&self, fragment: &RecordFragment) -> RowOutcome {
        let row_number = fragment.row_number;
        let fields = fragment.fields_for_create();

        match self.store.create(fields).await {
            Ok(created) => {
                let record_id = created.id.unwrap_or_default();
                info!(row_number = row_number, record_id = %record_id, "新建记录");
                outcome(
                    row_number,
                    FragmentState::Applied,
                    RowAction::Created { record_id },
                )
            }
            Err(e) => {
                error!(row_number = row_number, error = %e, "新建记录失败");
                failed(row_number, format!("新建记录失败: {}", e))
            }
        }
    }

    /// 补全已有记录
    ///
    /// 写入前重读实时记录并收窄补丁; 目标已消失时回退新建一次
    async fn update_record(
        &self,
        fragment: &RecordFragment,
        record_id: &str,
        patch: &FieldPatch,
        via: IdentityTier,
        locks: &RecordLocks,
    ) -> RowOutcome {
        let row_number = fragment.row_number;
        let lock = locks.handle(record_id);
        let _guard = lock.lock().await;

        let live = match self.store.get(record_id).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                return self.create_after_vanished(fragment, record_id).await;
            }
            Err(e) => {
                error!(row_number = row_number, record_id = %record_id, error = %e, "读取记录失败");
                return failed(row_number, format!("读取记录 {} 失败: {}", record_id, e));
            }
        };

        let mut link_conflicts = Vec::new();
        if let (Some(incoming), Some(existing)) =
            (patch.exam_link.as_deref(), live.get(CanonicalField::ExamLink))
        {
            if incoming.trim() != existing {
                warn!(row_number = row_number, record_id = %record_id, "链接已存在且不同,跳过");
                link_conflicts.push(LinkConflict {
                    record_id: record_id.to_string(),
                    existing_link: existing.to_string(),
                    incoming_link: incoming.to_string(),
                });
            }
        }

        let narrowed = patch.restrict_to_empty(&live);
        if narrowed.is_empty() {
            // 快照之后已被其它行填充
            debug!(row_number = row_number, record_id = %record_id, "补全字段已非空,按重复处理");
            let mut row_outcome = outcome(
                row_number,
                FragmentState::Skipped,
                RowAction::Duplicate {
                    record_id: Some(record_id.to_string()),
                    via: Some(via),
                    in_file: false,
                },
            );
            row_outcome.link_conflicts = link_conflicts;
            return row_outcome;
        }

        let mut row_outcome = match self.store.update(record_id, &narrowed).await {
            Ok(()) => {
                info!(
                    row_number = row_number,
                    record_id = %record_id,
                    via = %via,
                    fields = ?narrowed.field_names(),
                    "补全已有记录"
                );
                outcome(
                    row_number,
                    FragmentState::Applied,
                    RowAction::Updated {
                        record_id: record_id.to_string(),
                        patch: narrowed,
                        via,
                    },
                )
            }
            Err(e) if e.is_not_found() => self.create_after_vanished(fragment, record_id).await,
            Err(e) => {
                error!(row_number = row_number, record_id = %record_id, error = %e, "更新记录失败");
                failed(row_number, format!("更新记录 {} 失败: {}", record_id, e))
            }
        };
        row_outcome.link_conflicts = link_conflicts;
        row_outcome
    }

    /// 更新目标已消失: 仅回退新建一次
    async fn create_after_vanished(
        &self,
        fragment: &RecordFragment,
        vanished_id: &str,
    ) -> RowOutcome {
        let row_number = fragment.row_number;
        warn!(row_number = row_number, record_id = %vanished_id, "更新目标已消失,回退为新建");

        let fields = fragment.fields_for_create();
        match self.store.create(fields).await {
            Ok(created) => outcome(
                row_number,
                FragmentState::Applied,
                RowAction::CreatedAfterVanished {
                    vanished_id: vanished_id.to_string(),
                    record_id: created.id.unwrap_or_default(),
                },
            ),
            Err(e) => {
                error!(row_number = row_number, error = %e, "回退新建失败");
                failed(
                    row_number,
                    format!("更新目标 {} 已消失,回退新建失败: {}", vanished_id, e),
                )
            }
        }
    }

    /// 分组行: 按传播计划逐条补链接
    async fn apply_link_group(&self, fragment: &RecordFragment, ctx: RunContext<'_>) -> RowOutcome {
        let row_number = fragment.row_number;
        let plan = match self.propagator.propagate(fragment, ctx.index.records()) {
            LinkPropagation::Planned(plan) => plan,
            LinkPropagation::NoMatch { key, reason } => {
                info!(row_number = row_number, key = %key, reason = %reason, "分组行无法匹配");
                return outcome(
                    row_number,
                    FragmentState::Skipped,
                    RowAction::NoMatch { key, reason },
                );
            }
        };

        let mut updated_ids = Vec::new();
        let mut already_applied = plan.already_applied.len();
        let mut link_conflicts = plan.conflicts.clone();
        let mut store_errors = Vec::new();

        for record_id in &plan.targets {
            match self.fill_link(record_id, &plan.link, ctx.locks).await {
                Ok(LinkWrite::Written) => updated_ids.push(record_id.clone()),
                Ok(LinkWrite::AlreadySet) => already_applied += 1,
                Ok(LinkWrite::Conflict(existing_link)) => link_conflicts.push(LinkConflict {
                    record_id: record_id.clone(),
                    existing_link,
                    incoming_link: plan.link.clone(),
                }),
                Ok(LinkWrite::Vanished) => {
                    warn!(row_number = row_number, record_id = %record_id, "传播目标已消失,跳过");
                }
                Err(e) => {
                    error!(row_number = row_number, record_id = %record_id, error = %e, "写入链接失败");
                    store_errors.push(format!("记录 {} 写入链接失败: {}", record_id, e));
                }
            }
        }

        for conflict in &link_conflicts {
            warn!(
                row_number = row_number,
                record_id = %conflict.record_id,
                "链接已存在且不同,跳过"
            );
        }
        info!(
            row_number = row_number,
            strategy = %plan.strategy,
            updated = updated_ids.len(),
            already_applied = already_applied,
            conflicts = link_conflicts.len(),
            "分组链接传播完成"
        );

        let state = if !updated_ids.is_empty() {
            FragmentState::Applied
        } else if !store_errors.is_empty() {
            FragmentState::Failed
        } else {
            FragmentState::Skipped
        };
        let mut row_outcome = outcome(
            row_number,
            state,
            RowAction::LinkPropagated {
                strategy: plan.strategy,
                updated_ids,
                already_applied,
            },
        );
        row_outcome.link_conflicts = link_conflicts;
        row_outcome.store_errors = store_errors;
        row_outcome
    }

    async fn sync_one(
        &self,
        row_number: usize,
        update: &PendingLinkUpdate,
        locks: &RecordLocks,
    ) -> RowOutcome {
        let record_id = &update.record_id;
        match self.fill_link(record_id, &update.link, locks).await {
            Ok(LinkWrite::Written) => {
                debug!(record_id = %record_id, group = %update.group, "同步链接");
                outcome(
                    row_number,
                    FragmentState::Applied,
                    RowAction::LinkPropagated {
                        strategy: LinkMatchStrategy::Exact,
                        updated_ids: vec![record_id.clone()],
                        already_applied: 0,
                    },
                )
            }
            Ok(LinkWrite::AlreadySet) => outcome(
                row_number,
                FragmentState::Skipped,
                RowAction::LinkPropagated {
                    strategy: LinkMatchStrategy::Exact,
                    updated_ids: Vec::new(),
                    already_applied: 1,
                },
            ),
            Ok(LinkWrite::Conflict(existing_link)) => {
                let mut row_outcome = outcome(
                    row_number,
                    FragmentState::Skipped,
                    RowAction::LinkPropagated {
                        strategy: LinkMatchStrategy::Exact,
                        updated_ids: Vec::new(),
                        already_applied: 0,
                    },
                );
                row_outcome.link_conflicts.push(LinkConflict {
                    record_id: record_id.clone(),
                    existing_link,
                    incoming_link: update.link.clone(),
                });
                row_outcome
            }
            Ok(LinkWrite::Vanished) => outcome(
                row_number,
                FragmentState::Skipped,
                RowAction::NoMatch {
                    key: record_id.clone(),
                    reason: "记录已不存在".to_string(),
                },
            ),
            Err(e) => {
                error!(record_id = %record_id, error = %e, "同步链接失败");
                failed(row_number, format!("记录 {} 同步链接失败: {}", record_id, e))
            }
        }
    }

    /// 单条记录补链接: 加锁 → 重读 → 仅空值时写入
    async fn fill_link(
        &self,
        record_id: &str,
        link: &str,
        locks: &RecordLocks,
    ) -> RepositoryResult<LinkWrite> {
        let lock = locks.handle(record_id);
        let _guard = lock.lock().await;

        let live = match self.store.get(record_id).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => return Ok(LinkWrite::Vanished),
            Err(e) => return Err(e),
        };
        let link = link.trim();
        match live.get(CanonicalField::ExamLink) {
            Some(existing) if existing == link => return Ok(LinkWrite::AlreadySet),
            Some(existing) => return Ok(LinkWrite::Conflict(existing.to_string())),
            None => {}
        }

        match self.store.update(record_id, &FieldPatch::link(link)).await {
            Ok(()) => Ok(LinkWrite::Written),
            Err(e) if e.is_not_found() => Ok(LinkWrite::Vanished),
            Err(e) => Err(e),
        }
    }
}

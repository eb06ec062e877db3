// ==========================================
// 考试排程对账系统 - 运行诊断汇总
// ==========================================
// 职责: 单行结果 → 运行报告（计数 + 明细列表）
// 说明: 报告是操作员判断"改表头还是重跑"的主要依据
// ==========================================

use crate::domain::report::{
    HeaderDiagnostics, ImportReport, LinkConflictRow, LinkMatchRow, NoMatchRow, RowAction,
    RowErrorEntry, RowOutcome, SkippedRow,
};
use std::time::Duration;

// ==========================================
// DiagnosticsReporter
// ==========================================
#[derive(Debug, Clone)]
pub struct DiagnosticsReporter {
    report: ImportReport,
}

impl DiagnosticsReporter {
    pub fn new(run_id: impl Into<String>, total_count: usize) -> Self {
        Self {
            report: ImportReport {
                run_id: run_id.into(),
                total_count,
                ..Default::default()
            },
        }
    }

    pub fn with_headers(mut self, headers: Option<HeaderDiagnostics>) -> Self {
        self.report.headers = headers;
        self
    }

    /// 运行级错误（如快照读取失败）,不绑定具体行
    pub fn record_run_error(&mut self, message: impl Into<String>) {
        self.report.error_count += 1;
        self.report.errors.push(RowErrorEntry {
            fragment_ref: "run".to_string(),
            row_number: 0,
            message: message.into(),
        });
    }

    /// 累加单行结果
    pub fn record(&mut self, outcome: &RowOutcome) {
        let report = &mut self.report;
        let row_number = outcome.row_number;

        if !matches!(outcome.action, RowAction::Cancelled) {
            report.processed_count += 1;
        }

        match &outcome.action {
            RowAction::Created { .. } | RowAction::CreatedAfterVanished { .. } => {
                report.created_count += 1;
            }
            RowAction::Updated { .. } => report.updated_count += 1,
            RowAction::Duplicate { .. } => report.duplicate_count += 1,
            RowAction::LinkPropagated {
                strategy,
                updated_ids,
                ..
            } => {
                report.link_updated_count += updated_ids.len();
                // 没有新写入的分组行视为"已应用"
                if updated_ids.is_empty() && outcome.store_errors.is_empty() {
                    report.duplicate_count += 1;
                }
                report.link_matches.push(LinkMatchRow {
                    row_number,
                    strategy: *strategy,
                    updated: updated_ids.len(),
                });
            }
            RowAction::SkippedNoKey => {
                report.skipped_count += 1;
                report.skipped_rows.push(SkippedRow {
                    row_number,
                    context: outcome.raw_cells.clone(),
                });
            }
            RowAction::NoMatch { key, reason } => {
                report.no_match_count += 1;
                report.no_match_rows.push(NoMatchRow {
                    row_number,
                    key: key.clone(),
                    reason: reason.clone(),
                });
            }
            RowAction::Invalid { message } | RowAction::Failed { message } => {
                report.error_count += 1;
                report.errors.push(RowErrorEntry {
                    fragment_ref: format!("row {row_number}"),
                    row_number,
                    message: message.clone(),
                });
            }
            RowAction::Cancelled => report.cancelled = true,
        }

        for message in &outcome.store_errors {
            report.error_count += 1;
            report.errors.push(RowErrorEntry {
                fragment_ref: format!("row {row_number}"),
                row_number,
                message: message.clone(),
            });
        }

        for conflict in &outcome.link_conflicts {
            report.link_conflicts.push(LinkConflictRow {
                row_number,
                record_id: conflict.record_id.clone(),
                existing_link: conflict.existing_link.clone(),
                incoming_link: conflict.incoming_link.clone(),
            });
        }
    }

    pub fn finish(mut self, cancelled: bool, elapsed: Duration) -> ImportReport {
        self.report.cancelled |= cancelled;
        self.report.elapsed_ms = elapsed.as_millis();
        self.report
    }
}

/// 一次性汇总
pub fn build_report(
    run_id: &str,
    outcomes: &[RowOutcome],
    headers: Option<HeaderDiagnostics>,
    elapsed: Duration,
) -> ImportReport {
    let mut reporter = DiagnosticsReporter::new(run_id, outcomes.len()).with_headers(headers);
    for outcome in outcomes {
        reporter.record(outcome);
    }
    reporter.finish(false, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::LinkConflict;
    use crate::domain::types::{FragmentState, IdentityTier, LinkMatchStrategy};

    #[test]
    fn test_counts_and_lists() {
        let mut skipped = RowOutcome::new(5, FragmentState::Skipped, RowAction::SkippedNoKey);
        skipped.raw_cells = vec![("Ghi chú".to_string(), "vắng".to_string())];

        let mut duplicate = RowOutcome::new(
            3,
            FragmentState::Skipped,
            RowAction::Duplicate {
                record_id: Some("r1".to_string()),
                via: Some(IdentityTier::StudentId),
                in_file: false,
            },
        );
        duplicate.link_conflicts.push(LinkConflict {
            record_id: "r1".to_string(),
            existing_link: "https://a.example".to_string(),
            incoming_link: "https://b.example".to_string(),
        });

        let outcomes = vec![
            RowOutcome::new(
                2,
                FragmentState::Applied,
                RowAction::Created {
                    record_id: "n1".to_string(),
                },
            ),
            duplicate,
            RowOutcome::new(
                4,
                FragmentState::Applied,
                RowAction::LinkPropagated {
                    strategy: LinkMatchStrategy::Relaxed,
                    updated_ids: vec!["r2".to_string(), "r3".to_string()],
                    already_applied: 0,
                },
            ),
            skipped,
            RowOutcome::new(
                6,
                FragmentState::Skipped,
                RowAction::NoMatch {
                    key: "STUDENT_ID=sv09".to_string(),
                    reason: "ambiguous".to_string(),
                },
            ),
            RowOutcome::new(
                7,
                FragmentState::Failed,
                RowAction::Invalid {
                    message: "链接格式无效".to_string(),
                },
            ),
            RowOutcome::new(8, FragmentState::Pending, RowAction::Cancelled),
        ];

        let report = build_report("run-1", &outcomes, None, Duration::from_millis(12));

        assert_eq!(report.total_count, 7);
        assert_eq!(report.processed_count, 6);
        assert_eq!(report.created_count, 1);
        assert_eq!(report.duplicate_count, 1);
        assert_eq!(report.link_updated_count, 2);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.skipped_rows[0].context[0].0, "Ghi chú");
        assert_eq!(report.no_match_rows[0].key, "STUDENT_ID=sv09");
        assert_eq!(report.error_count, 1);
        assert_eq!(report.errors[0].fragment_ref, "row 7");
        assert_eq!(report.link_conflicts.len(), 1);
        assert_eq!(report.link_matches[0].strategy, LinkMatchStrategy::Relaxed);
        assert!(report.cancelled);
        assert_eq!(report.elapsed_ms, 12);
    }

    #[test]
    fn test_run_error_recorded() {
        let mut reporter = DiagnosticsReporter::new("run-2", 3);
        reporter.record_run_error("快照读取失败");
        let report = reporter.finish(false, Duration::ZERO);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.errors[0].row_number, 0);
        assert!(!report.has_writes());
    }
}

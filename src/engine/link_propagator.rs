// ==========================================
// 考试排程对账系统 - 链接分组传播引擎
// ==========================================
// 职责: "只有链接 + 考试元数据" 的行 → 分组内所有空链接记录的补全计划
// 策略:
//   1. Exact: 分组键 (examDate, subject, examSession, examTime, examRoom, examType) 完全一致
//   2. Relaxed: 第一轮无命中时,仅按考场（可选数字等价）或链接相等回退
// 红线: 已有不同链接的记录不覆盖,只报告冲突
// 红线: 两种策略分别记录,诊断能区分"可信"与"尽力而为"
// ==========================================

use crate::domain::record::{CanonicalField, ExamRecord, GroupKey, RecordFragment};
use crate::domain::report::LinkConflict;
use crate::domain::types::LinkMatchStrategy;
use crate::engine::matcher::record_key;
use crate::importer::data_cleaner::room_digits;
use tracing::{debug, warn};

/// 计算记录的分组键（各字段规范化,空值为空串）
pub fn group_key(record: &ExamRecord) -> GroupKey {
    let key = |field| record_key(record, field).unwrap_or_default();
    GroupKey {
        exam_date: key(CanonicalField::ExamDate),
        subject: key(CanonicalField::Subject),
        exam_session: key(CanonicalField::ExamSession),
        exam_time: key(CanonicalField::ExamTime),
        exam_room: key(CanonicalField::ExamRoom),
        exam_type: key(CanonicalField::ExamType),
    }
}

/// 传播计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    pub strategy: LinkMatchStrategy,
    pub link: String,
    /// 链接为空、待写入的记录
    pub targets: Vec<String>,
    /// 链接已相同的记录
    pub already_applied: Vec<String>,
    /// 已有不同链接的记录
    pub conflicts: Vec<LinkConflict>,
}

impl LinkPlan {
    pub fn matched(&self) -> usize {
        self.targets.len() + self.already_applied.len() + self.conflicts.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPropagation {
    Planned(LinkPlan),
    NoMatch { key: String, reason: String },
}

// ==========================================
// LinkPropagator
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct LinkPropagator {
    /// 宽松匹配时 "Phòng 101" 与 "101" 视为同一考场
    relaxed_room_digits: bool,
}

impl Default for LinkPropagator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LinkPropagator {
    pub fn new(relaxed_room_digits: bool) -> Self {
        Self {
            relaxed_room_digits,
        }
    }

    /// 为分组行生成传播计划
    pub fn propagate(&self, fragment: &RecordFragment, records: &[ExamRecord]) -> LinkPropagation {
        let link = match fragment.fields.get(CanonicalField::ExamLink) {
            Some(link) => link.to_string(),
            None => {
                return LinkPropagation::NoMatch {
                    key: String::new(),
                    reason: "分组行缺少链接".to_string(),
                }
            }
        };
        let key = group_key(&fragment.fields);

        // ===== 第一轮: 分组键完全一致 =====
        let exact: Vec<&ExamRecord> = records.iter().filter(|r| group_key(r) == key).collect();
        if !exact.is_empty() {
            let plan = build_plan(LinkMatchStrategy::Exact, &link, &exact);
            debug!(
                row_number = fragment.row_number,
                group = %key,
                matched = plan.matched(),
                targets = plan.targets.len(),
                "分组键精确命中"
            );
            return LinkPropagation::Planned(plan);
        }

        // ===== 第二轮: 考场或链接回退 =====
        let relaxed: Vec<&ExamRecord> = records
            .iter()
            .filter(|r| self.relaxed_match(&fragment.fields, r, &link))
            .collect();
        if !relaxed.is_empty() {
            let plan = build_plan(LinkMatchStrategy::Relaxed, &link, &relaxed);
            warn!(
                row_number = fragment.row_number,
                group = %key,
                matched = plan.matched(),
                targets = plan.targets.len(),
                "分组键未命中,按考场/链接宽松匹配"
            );
            return LinkPropagation::Planned(plan);
        }

        LinkPropagation::NoMatch {
            key: key.to_string(),
            reason: "没有分组键一致的记录,考场与链接也未匹配".to_string(),
        }
    }

    fn relaxed_match(&self, fragment: &ExamRecord, record: &ExamRecord, link: &str) -> bool {
        if record.get(CanonicalField::ExamLink).map(str::trim) == Some(link.trim()) {
            return true;
        }

        let incoming_room = fragment.get(CanonicalField::ExamRoom);
        let existing_room = record.get(CanonicalField::ExamRoom);
        let (incoming_room, existing_room) = match (incoming_room, existing_room) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };

        let room = record_key(fragment, CanonicalField::ExamRoom);
        if room == record_key(record, CanonicalField::ExamRoom) {
            return true;
        }

        self.relaxed_room_digits
            && match (room_digits(incoming_room), room_digits(existing_room)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
    }
}

fn build_plan(strategy: LinkMatchStrategy, link: &str, matched: &[&ExamRecord]) -> LinkPlan {
    let mut plan = LinkPlan {
        strategy,
        link: link.to_string(),
        targets: Vec::new(),
        already_applied: Vec::new(),
        conflicts: Vec::new(),
    };

    for record in matched {
        let id = match &record.id {
            Some(id) => id.clone(),
            None => continue,
        };
        match record.get(CanonicalField::ExamLink) {
            None => plan.targets.push(id),
            Some(existing) if existing == link.trim() => plan.already_applied.push(id),
            Some(existing) => plan.conflicts.push(LinkConflict {
                record_id: id,
                existing_link: existing.to_string(),
                incoming_link: link.to_string(),
            }),
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "https://meet.example/p101";

    fn existing(id: &str, room: &str, link: Option<&str>) -> ExamRecord {
        ExamRecord {
            id: Some(id.to_string()),
            student_id: Some(format!("SV-{id}")),
            exam_date: Some("2024-05-01".to_string()),
            subject: Some("Toán cao cấp".to_string()),
            exam_session: Some("Sáng".to_string()),
            exam_room: Some(room.to_string()),
            exam_link: link.map(str::to_string),
            ..Default::default()
        }
    }

    fn link_row(room: &str, subject: &str) -> RecordFragment {
        RecordFragment::new(
            2,
            ExamRecord {
                exam_date: Some("2024-05-01".to_string()),
                subject: Some(subject.to_string()),
                exam_session: Some("Sáng".to_string()),
                exam_room: Some(room.to_string()),
                exam_link: Some(LINK.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_exact_group_fills_empty_links_only() {
        let records = vec![
            existing("r1", "P101", None),
            existing("r2", "P101", None),
            existing("r3", "P101", Some(LINK)),
            existing("r4", "P101", Some("https://meet.example/other")),
            existing("r5", "P102", None),
        ];

        match LinkPropagator::default().propagate(&link_row("P101", "Toán cao cấp"), &records) {
            LinkPropagation::Planned(plan) => {
                assert_eq!(plan.strategy, LinkMatchStrategy::Exact);
                assert_eq!(plan.targets, vec!["r1", "r2"]);
                assert_eq!(plan.already_applied, vec!["r3"]);
                assert_eq!(plan.conflicts.len(), 1);
                assert_eq!(plan.conflicts[0].record_id, "r4");
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn test_relaxed_room_digits() {
        let records = vec![existing("r1", "101", None), existing("r2", "102", None)];

        // 科目不同 → 精确未命中,按考场数字回退
        match LinkPropagator::new(true).propagate(&link_row("Phòng 101", "Toán"), &records) {
            LinkPropagation::Planned(plan) => {
                assert_eq!(plan.strategy, LinkMatchStrategy::Relaxed);
                assert_eq!(plan.targets, vec!["r1"]);
            }
            other => panic!("expected relaxed plan, got {other:?}"),
        }

        // 关闭数字等价后不命中
        assert!(matches!(
            LinkPropagator::new(false).propagate(&link_row("Phòng 101", "Toán"), &records),
            LinkPropagation::NoMatch { .. }
        ));
    }

    #[test]
    fn test_relaxed_by_link_equality() {
        let records = vec![existing("r1", "A1", Some(LINK))];
        match LinkPropagator::new(false).propagate(&link_row("B2", "Lý"), &records) {
            LinkPropagation::Planned(plan) => {
                assert_eq!(plan.strategy, LinkMatchStrategy::Relaxed);
                assert!(plan.targets.is_empty());
                assert_eq!(plan.already_applied, vec!["r1"]);
            }
            other => panic!("expected relaxed plan, got {other:?}"),
        }
    }

    #[test]
    fn test_group_key_normalization() {
        let a = ExamRecord {
            subject: Some(" Toán  Cao cấp".to_string()),
            exam_time: Some("07h30–08h30".to_string()),
            ..Default::default()
        };
        let b = ExamRecord {
            subject: Some("toán cao cấp".to_string()),
            exam_time: Some("7:30 - 8:30".to_string()),
            ..Default::default()
        };
        assert_eq!(group_key(&a), group_key(&b));
    }
}

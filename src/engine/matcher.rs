// ==========================================
// 考试排程对账系统 - 记录匹配 / 去重引擎
// ==========================================
// 职责: 导入片段 × 记录快照 → 分类决策
//       (无键跳过 / 重复 / 补全更新 / 新建 / 无法匹配)
// 红线: 无状态、无副作用、无 I/O 操作
// 红线: 置信度不足时只报告无法匹配,不做最佳猜测
// ==========================================

use crate::domain::record::{CanonicalField, ExamRecord, FieldPatch, RecordFragment};
use crate::domain::types::IdentityTier;
use crate::importer::data_cleaner::{
    normalize_exam_time, normalize_for_search, normalize_identity, normalize_text,
};
use crate::importer::date_normalizer::normalize_date_text;
use std::collections::HashMap;
use tracing::debug;

/// 判定"同一场考试"时比较的字段（examDate 单独处理）
pub const SITTING_FIELDS: [CanonicalField; 7] = [
    CanonicalField::Subject,
    CanonicalField::ExamSession,
    CanonicalField::ExamTime,
    CanonicalField::ExamRoom,
    CanonicalField::Course,
    CanonicalField::MajorCode,
    CanonicalField::ExamType,
];

// ==========================================
// 比较用规范化
// ==========================================

/// 字段值的比较键（空值返回 None）
pub fn field_key(field: CanonicalField, value: Option<&str>) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    let key = match field {
        CanonicalField::ExamDate | CanonicalField::Dob => {
            let normalized = normalize_date_text(value);
            if normalized.is_empty() {
                normalize_text(value)
            } else {
                normalized
            }
        }
        CanonicalField::ExamTime => normalize_exam_time(value),
        CanonicalField::StudentId | CanonicalField::Username => normalize_identity(value),
        CanonicalField::FullName => normalize_text(&normalize_for_search(value)),
        _ => normalize_text(value),
    };
    Some(key).filter(|k| !k.is_empty())
}

/// 记录字段的比较键
pub fn record_key(record: &ExamRecord, field: CanonicalField) -> Option<String> {
    field_key(field, record.get(field))
}

/// 身份键（按层级）
///
/// - StudentId / Username: 规范化后的值
/// - NameDob: 姓名与出生日期都必须非空
pub fn identity_key(record: &ExamRecord, tier: IdentityTier) -> Option<String> {
    match tier {
        IdentityTier::StudentId => record_key(record, CanonicalField::StudentId),
        IdentityTier::Username => record_key(record, CanonicalField::Username),
        IdentityTier::NameDob => {
            let name = record_key(record, CanonicalField::FullName)?;
            let dob = record_key(record, CanonicalField::Dob)?;
            Some(format!("{name}||{dob}"))
        }
    }
}

/// 低层级命中时,更高层级身份不得冲突（双方都有值且不同）
fn higher_tiers_consistent(fragment: &ExamRecord, record: &ExamRecord, tier: IdentityTier) -> bool {
    IdentityTier::ALL
        .iter()
        .take_while(|t| **t != tier)
        .all(|higher| match (identity_key(fragment, *higher), identity_key(record, *higher)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
}

/// 片段与记录是否为同一场考试（完全一致）
///
/// # 规则
/// - 片段未提供的字段不参与比较
/// - 片段提供的字段必须与记录一致（记录为空视为不一致）
/// - examDate: 记录为空而片段提供 → 不一致（属于待补全的新信息）
pub fn is_same_sitting(fragment: &ExamRecord, record: &ExamRecord) -> bool {
    sitting_fields_match(fragment, record)
        && match (
            record_key(fragment, CanonicalField::ExamDate),
            record_key(record, CanonicalField::ExamDate),
        ) {
            (Some(a), Some(b)) => a == b,
            (Some(_), None) => false,
            (None, _) => true,
        }
}

/// 片段与记录是否可能为同一场考试（examDate 允许记录侧为空）
pub fn is_sitting_compatible(fragment: &ExamRecord, record: &ExamRecord) -> bool {
    sitting_fields_match(fragment, record)
        && match (
            record_key(fragment, CanonicalField::ExamDate),
            record_key(record, CanonicalField::ExamDate),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
}

fn sitting_fields_match(fragment: &ExamRecord, record: &ExamRecord) -> bool {
    SITTING_FIELDS.iter().all(|field| match record_key(fragment, *field) {
        Some(incoming) => record_key(record, *field).as_deref() == Some(incoming.as_str()),
        None => true,
    })
}

/// 可补全字段的差异（记录为空且片段有值）
pub fn fillable_delta(fragment: &ExamRecord, record: &ExamRecord) -> FieldPatch {
    let fill = |field: CanonicalField| match (fragment.get(field), record.get(field)) {
        (Some(incoming), None) => Some(incoming.to_string()),
        _ => None,
    };
    FieldPatch {
        exam_date: fill(CanonicalField::ExamDate),
        exam_link: fill(CanonicalField::ExamLink),
    }
}

// ==========================================
// SnapshotIndex - 快照身份索引
// ==========================================
// 运行开始时构建一次,执行期间只读
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    records: Vec<ExamRecord>,
    by_tier: HashMap<IdentityTier, HashMap<String, Vec<usize>>>,
}

impl SnapshotIndex {
    pub fn build(records: Vec<ExamRecord>) -> Self {
        let mut by_tier: HashMap<IdentityTier, HashMap<String, Vec<usize>>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            for tier in IdentityTier::ALL {
                if let Some(key) = identity_key(record, tier) {
                    by_tier.entry(tier).or_default().entry(key).or_default().push(idx);
                }
            }
        }
        Self { records, by_tier }
    }

    pub fn records(&self) -> &[ExamRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按层级查找身份候选
    pub fn lookup(&self, tier: IdentityTier, key: &str) -> Vec<&ExamRecord> {
        self.by_tier
            .get(&tier)
            .and_then(|m| m.get(key))
            .map(|idxs| idxs.iter().map(|i| &self.records[*i]).collect())
            .unwrap_or_default()
    }
}

// ==========================================
// MatchDecision - 分类决策
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    /// 无任何身份或分组信息
    SkipNoKey,
    /// 已存在同一场考试
    Duplicate {
        record_id: String,
        via: IdentityTier,
        /// 记录链接已存在且与导入不同（不覆盖,仅报告）
        conflicting_link: Option<(String, String)>,
    },
    /// 补全已有记录的空字段
    Update {
        record_id: String,
        patch: FieldPatch,
        via: IdentityTier,
    },
    /// 新建
    Create,
    /// 有键但无法确定匹配
    NoMatch { key: String, reason: String },
}

/// 匹配策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchPolicy {
    /// 身份命中但无相容场次时新建
    pub create_new_sittings: bool,
}

// ==========================================
// RecordMatcher
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMatcher {
    policy: MatchPolicy,
}

impl RecordMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// 片段是否不携带任何身份或分组字段
    pub fn has_no_key(fragment: &RecordFragment) -> bool {
        let f = &fragment.fields;
        [
            CanonicalField::StudentId,
            CanonicalField::FullName,
            CanonicalField::ExamSession,
            CanonicalField::ExamRoom,
        ]
        .iter()
        .all(|field| f.get(*field).is_none())
    }

    /// 分类
    ///
    /// # 流程
    /// 1. 无身份/分组字段 → SkipNoKey
    /// 2. 按 studentId > username > (fullName, dob) 取第一个有候选的层级
    /// 3. 候选中存在同一场考试且无可补字段 → Duplicate（优先）
    /// 4. 相容场次中恰好一条有可补字段 → Update; 多条 → NoMatch（歧义）
    /// 5. 无身份命中且有 studentId 或 fullName → Create
    pub fn classify(&self, fragment: &RecordFragment, index: &SnapshotIndex) -> MatchDecision {
        if Self::has_no_key(fragment) {
            return MatchDecision::SkipNoKey;
        }
        let incoming = &fragment.fields;

        for tier in IdentityTier::ALL {
            let key = match identity_key(incoming, tier) {
                Some(key) => key,
                None => continue,
            };
            let candidates: Vec<&ExamRecord> = index
                .lookup(tier, &key)
                .into_iter()
                .filter(|r| higher_tiers_consistent(incoming, r, tier))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            debug!(
                row_number = fragment.row_number,
                tier = %tier,
                key = %key,
                candidates = candidates.len(),
                "身份命中"
            );
            return self.classify_candidates(fragment, tier, &key, &candidates);
        }

        if incoming.get(CanonicalField::StudentId).is_some()
            || incoming.get(CanonicalField::FullName).is_some()
        {
            return MatchDecision::Create;
        }

        MatchDecision::NoMatch {
            key: describe_grouping(incoming),
            reason: "缺少身份字段（学号/姓名）,且不是链接分组行".to_string(),
        }
    }

    fn classify_candidates(
        &self,
        fragment: &RecordFragment,
        tier: IdentityTier,
        key: &str,
        candidates: &[&ExamRecord],
    ) -> MatchDecision {
        let incoming = &fragment.fields;

        // 重复优先: 同一场考试且没有可补字段
        let duplicate = candidates
            .iter()
            .find(|r| is_same_sitting(incoming, r) && fillable_delta(incoming, r).is_empty());
        if let Some(record) = duplicate {
            let conflicting_link = match (
                incoming.get(CanonicalField::ExamLink),
                record.get(CanonicalField::ExamLink),
            ) {
                (Some(a), Some(b)) if a != b => Some((b.to_string(), a.to_string())),
                _ => None,
            };
            return MatchDecision::Duplicate {
                record_id: record.id.clone().unwrap_or_default(),
                via: tier,
                conflicting_link,
            };
        }

        let updatable: Vec<(&ExamRecord, FieldPatch)> = candidates
            .iter()
            .filter(|r| is_sitting_compatible(incoming, r))
            .map(|r| (*r, fillable_delta(incoming, r)))
            .filter(|(_, patch)| !patch.is_empty())
            .collect();

        match updatable.as_slice() {
            [(record, patch)] => MatchDecision::Update {
                record_id: record.id.clone().unwrap_or_default(),
                patch: patch.clone(),
                via: tier,
            },
            [] => {
                if self.policy.create_new_sittings {
                    MatchDecision::Create
                } else {
                    MatchDecision::NoMatch {
                        key: format!("{tier}={key}"),
                        reason: format!(
                            "身份命中 {} 条记录,但没有相同或可补全的考试场次",
                            candidates.len()
                        ),
                    }
                }
            }
            many => MatchDecision::NoMatch {
                key: format!("{tier}={key}"),
                reason: format!("身份命中且有 {} 条可补全的场次,无法确定目标", many.len()),
            },
        }
    }
}

/// 分组字段描述（诊断用）
pub fn describe_grouping(record: &ExamRecord) -> String {
    [
        CanonicalField::ExamDate,
        CanonicalField::Subject,
        CanonicalField::ExamSession,
        CanonicalField::ExamTime,
        CanonicalField::ExamRoom,
    ]
    .iter()
    .filter_map(|f| record.get(*f).map(|v| format!("{f}={v}")))
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, student_id: &str) -> ExamRecord {
        ExamRecord {
            id: Some(id.to_string()),
            student_id: Some(student_id.to_string()),
            subject: Some("Toán".to_string()),
            exam_session: Some("Ca 1".to_string()),
            exam_room: Some("P101".to_string()),
            ..Default::default()
        }
    }

    fn fragment(fields: ExamRecord) -> RecordFragment {
        RecordFragment::new(2, fields)
    }

    #[test]
    fn test_skip_no_key() {
        let index = SnapshotIndex::build(vec![]);
        let f = fragment(ExamRecord {
            subject: Some("Toán".to_string()),
            exam_link: Some("https://meet.example/a".to_string()),
            ..Default::default()
        });
        assert_eq!(RecordMatcher::default().classify(&f, &index), MatchDecision::SkipNoKey);
    }

    #[test]
    fn test_update_then_duplicate() {
        let existing = record("r1", "SV01");
        let mut incoming = existing.clone();
        incoming.id = None;
        incoming.exam_date = Some("2024-05-01".to_string());

        let index = SnapshotIndex::build(vec![existing.clone()]);
        let decision = RecordMatcher::default().classify(&fragment(incoming.clone()), &index);
        match decision {
            MatchDecision::Update { record_id, patch, via } => {
                assert_eq!(record_id, "r1");
                assert_eq!(patch.exam_date.as_deref(), Some("2024-05-01"));
                assert_eq!(patch.exam_link, None);
                assert_eq!(via, IdentityTier::StudentId);
            }
            other => panic!("expected update, got {other:?}"),
        }

        // 补全后再导入 → 重复
        let mut applied = existing;
        applied.exam_date = Some("2024-05-01".to_string());
        let index = SnapshotIndex::build(vec![applied]);
        assert!(matches!(
            RecordMatcher::default().classify(&fragment(incoming), &index),
            MatchDecision::Duplicate { .. }
        ));
    }

    #[test]
    fn test_normalized_fields_are_duplicate() {
        let existing = ExamRecord {
            exam_time: Some("07h30–08h30".to_string()),
            ..record("r1", "SV01")
        };
        let incoming = ExamRecord {
            student_id: Some(" sv01 ".to_string()),
            subject: Some("  toán ".to_string()),
            exam_time: Some("7:30 - 8:30".to_string()),
            ..Default::default()
        };
        let index = SnapshotIndex::build(vec![existing]);
        assert!(matches!(
            RecordMatcher::default().classify(&fragment(incoming), &index),
            MatchDecision::Duplicate { .. }
        ));
    }

    #[test]
    fn test_duplicate_reports_conflicting_link() {
        let existing = ExamRecord {
            exam_link: Some("https://meet.example/old".to_string()),
            ..record("r1", "SV01")
        };
        let incoming = ExamRecord {
            student_id: Some("SV01".to_string()),
            exam_link: Some("https://meet.example/new".to_string()),
            ..Default::default()
        };
        let index = SnapshotIndex::build(vec![existing]);
        match RecordMatcher::default().classify(&fragment(incoming), &index) {
            MatchDecision::Duplicate {
                conflicting_link: Some((existing, incoming)),
                ..
            } => {
                assert_eq!(existing, "https://meet.example/old");
                assert_eq!(incoming, "https://meet.example/new");
            }
            other => panic!("expected duplicate with conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_create_when_no_identity_match() {
        let index = SnapshotIndex::build(vec![record("r1", "SV01")]);
        let incoming = ExamRecord {
            student_id: Some("SV02".to_string()),
            ..Default::default()
        };
        assert_eq!(
            RecordMatcher::default().classify(&fragment(incoming), &index),
            MatchDecision::Create
        );
    }

    #[test]
    fn test_identity_without_compatible_sitting() {
        let index = SnapshotIndex::build(vec![record("r1", "SV01")]);
        let incoming = ExamRecord {
            student_id: Some("SV01".to_string()),
            subject: Some("Lý".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            RecordMatcher::default().classify(&fragment(incoming.clone()), &index),
            MatchDecision::NoMatch { .. }
        ));
        let permissive = RecordMatcher::new(MatchPolicy {
            create_new_sittings: true,
        });
        assert_eq!(permissive.classify(&fragment(incoming), &index), MatchDecision::Create);
    }

    #[test]
    fn test_ambiguous_update_is_no_match() {
        let a = record("r1", "SV01");
        let b = ExamRecord {
            subject: Some("Lý".to_string()),
            ..record("r2", "SV01")
        };
        let index = SnapshotIndex::build(vec![a, b]);
        let incoming = ExamRecord {
            student_id: Some("SV01".to_string()),
            exam_link: Some("https://meet.example/a".to_string()),
            ..Default::default()
        };
        match RecordMatcher::default().classify(&fragment(incoming), &index) {
            MatchDecision::NoMatch { key, .. } => assert_eq!(key, "STUDENT_ID=sv01"),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_tier_priority_and_consistency() {
        // 同名同生日但学号不同 → 不是同一人
        let existing = ExamRecord {
            full_name: Some("Nguyễn Văn A".to_string()),
            dob: Some("2003-08-15".to_string()),
            ..record("r1", "SV01")
        };
        let index = SnapshotIndex::build(vec![existing]);
        let incoming = ExamRecord {
            student_id: Some("SV09".to_string()),
            full_name: Some("nguyen van a".to_string()),
            dob: Some("15/08/2003".to_string()),
            ..Default::default()
        };
        assert_eq!(
            RecordMatcher::default().classify(&fragment(incoming), &index),
            MatchDecision::Create
        );

        // 无学号时按姓名 + 出生日期命中
        let incoming = ExamRecord {
            full_name: Some("Nguyễn Văn A".to_string()),
            dob: Some("2003-08-15".to_string()),
            exam_date: Some("2024-05-01".to_string()),
            ..Default::default()
        };
        match RecordMatcher::default().classify(&fragment(incoming), &index) {
            MatchDecision::Update { via, .. } => assert_eq!(via, IdentityTier::NameDob),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_grouping_only_row_is_no_match() {
        let index = SnapshotIndex::build(vec![]);
        let incoming = ExamRecord {
            exam_room: Some("P101".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            RecordMatcher::default().classify(&fragment(incoming), &index),
            MatchDecision::NoMatch { .. }
        ));
    }
}

// ==========================================
// 考试排程对账系统 - 文件内重复检测
// ==========================================
// 职责: 检测同一文件内重复出现的 (身份, 场次) 行
// 规则: 首次出现者胜出,后续行的可补全字段（日期/链接）并入首行
// 说明: 链接分组行不参与（传播本身幂等）
// ==========================================

use crate::domain::record::{CanonicalField, FieldPatch, RecordFragment};
use crate::domain::types::IdentityTier;
use crate::engine::matcher::{identity_key, record_key, SITTING_FIELDS};
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct ConflictHandler;

/// 同一去重键下的一个代表行
struct Representative {
    row_number: usize,
    exam_date: Option<String>,
}

impl ConflictHandler {
    /// 行的去重键（身份层级 + 场次字段）
    ///
    /// 日期与链接是可补全字段,不进入键;无身份的行返回 None
    pub fn duplicate_key(fragment: &RecordFragment) -> Option<String> {
        if fragment.is_link_group_row() {
            return None;
        }
        let fields = &fragment.fields;
        // 只有姓名（无出生日期）的行按姓名去重
        let identity = IdentityTier::ALL
            .iter()
            .find_map(|tier| identity_key(fields, *tier).map(|key| format!("{tier}={key}")))
            .or_else(|| {
                record_key(fields, CanonicalField::FullName).map(|name| format!("NAME={name}"))
            })?;

        let sitting = SITTING_FIELDS
            .iter()
            .map(|f| record_key(fields, *f).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("||");

        Some(format!("{identity}##{sitting}"))
    }

    /// 检测同一文件内的重复行
    ///
    /// 同键的两行日期相同或任一方为空时视为重复;日期不同则是两次考试
    ///
    /// # 返回
    /// - HashMap<行号, 首次出现行号>: 重复行（不包括第一次出现）
    pub fn detect_duplicates(&self, fragments: &[RecordFragment]) -> HashMap<usize, usize> {
        let mut groups: HashMap<String, Vec<Representative>> = HashMap::new();
        let mut duplicates = HashMap::new();

        for fragment in fragments {
            if !fragment.validation_errors.is_empty() {
                continue;
            }
            let Some(key) = Self::duplicate_key(fragment) else {
                continue;
            };
            let date = record_key(&fragment.fields, CanonicalField::ExamDate);
            let reps = groups.entry(key).or_default();

            let compatible = reps.iter_mut().find(|rep| match (&rep.exam_date, &date) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            });
            match compatible {
                Some(rep) => {
                    duplicates.insert(fragment.row_number, rep.row_number);
                    if rep.exam_date.is_none() {
                        rep.exam_date = date;
                    }
                }
                None => reps.push(Representative {
                    row_number: fragment.row_number,
                    exam_date: date,
                }),
            }
        }

        duplicates
    }

    /// 把重复行的可补全字段并入首行（首行已有的值不覆盖）
    pub fn merge_duplicates(
        &self,
        fragments: &mut [RecordFragment],
        duplicates: &HashMap<usize, usize>,
    ) {
        let position: HashMap<usize, usize> = fragments
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.row_number, idx))
            .collect();

        let mut rows: Vec<(&usize, &usize)> = duplicates.iter().collect();
        rows.sort();

        for (row, first_row) in rows {
            let (Some(&dup_idx), Some(&first_idx)) = (position.get(row), position.get(first_row))
            else {
                continue;
            };
            let incoming = FieldPatch {
                exam_date: fragments[dup_idx].fields.exam_date.clone(),
                exam_link: fragments[dup_idx].fields.exam_link.clone(),
            };
            let first = &mut fragments[first_idx];

            if let (Some(kept), Some(other)) = (&first.fields.exam_link, &incoming.exam_link) {
                if kept != other {
                    warn!(
                        row_number = *row,
                        first_row = *first_row,
                        kept = %kept,
                        ignored = %other,
                        "文件内重复行链接不一致,保留首行"
                    );
                }
            }

            let patch = incoming.restrict_to_empty(&first.fields);
            if !patch.is_empty() {
                debug!(
                    row_number = *row,
                    first_row = *first_row,
                    fields = ?patch.field_names(),
                    "重复行字段并入首行"
                );
                first.fields.apply_patch(&patch);
            }
        }
    }
}

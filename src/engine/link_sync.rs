// ==========================================
// 考试排程对账系统 - 仓储内链接同步计划
// ==========================================
// 职责: 在现有记录内部,把同一考场已有的链接补到同组空链接记录上
// 分组: (subject, examSession, examTime, examRoom, course, majorCode, examType) 规范化
// 红线: 组内出现多个不同链接时整组跳过,不猜测
// ==========================================

use crate::domain::record::{CanonicalField, ExamRecord};
use crate::engine::matcher::record_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SYNC_GROUP_FIELDS: [CanonicalField; 7] = [
    CanonicalField::Subject,
    CanonicalField::ExamSession,
    CanonicalField::ExamTime,
    CanonicalField::ExamRoom,
    CanonicalField::Course,
    CanonicalField::MajorCode,
    CanonicalField::ExamType,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLinkUpdate {
    pub record_id: String,
    pub link: String,
    pub group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSyncPlan {
    pub updates: Vec<PendingLinkUpdate>,
    /// 组内链接不一致而被跳过的分组
    pub ambiguous_groups: Vec<String>,
}

fn sync_group_key(record: &ExamRecord) -> String {
    SYNC_GROUP_FIELDS
        .iter()
        .map(|f| record_key(record, *f).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("||")
}

/// 计算待同步的链接更新
pub fn compute_pending_link_updates(records: &[ExamRecord]) -> LinkSyncPlan {
    let mut groups: BTreeMap<String, Vec<&ExamRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.id.is_some()) {
        groups.entry(sync_group_key(record)).or_default().push(record);
    }

    let mut plan = LinkSyncPlan::default();
    for (group, members) in groups {
        let mut links: Vec<&str> = members
            .iter()
            .filter_map(|r| r.get(CanonicalField::ExamLink))
            .collect();
        links.sort_unstable();
        links.dedup();

        let link = match links.as_slice() {
            [] => continue,
            [single] => single.to_string(),
            _ => {
                plan.ambiguous_groups.push(group);
                continue;
            }
        };

        for member in members {
            if member.get(CanonicalField::ExamLink).is_some() {
                continue;
            }
            if let Some(id) = &member.id {
                plan.updates.push(PendingLinkUpdate {
                    record_id: id.clone(),
                    link: link.clone(),
                    group: group.clone(),
                });
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, room: &str, link: Option<&str>) -> ExamRecord {
        ExamRecord {
            id: Some(id.to_string()),
            subject: Some("Toán".to_string()),
            exam_session: Some("Ca 1".to_string()),
            exam_room: Some(room.to_string()),
            exam_link: link.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_fills_empty_members_from_provider() {
        let records = vec![
            rec("a", "P101", Some("https://meet.example/p101")),
            rec("b", "p101", None),
            rec("c", "P102", None),
        ];
        let plan = compute_pending_link_updates(&records);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].record_id, "b");
        assert_eq!(plan.updates[0].link, "https://meet.example/p101");
        assert!(plan.ambiguous_groups.is_empty());
    }

    #[test]
    fn test_ambiguous_group_skipped() {
        let records = vec![
            rec("a", "P101", Some("https://meet.example/1")),
            rec("b", "P101", Some("https://meet.example/2")),
            rec("c", "P101", None),
        ];
        let plan = compute_pending_link_updates(&records);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.ambiguous_groups.len(), 1);
    }
}

// ==========================================
// 考试排程对账系统 - 考场清单
// ==========================================
// 职责: 从考试记录派生唯一考场列表（供核对链接分配）
// 键: (examDate, subject, examSession, examTime, examRoom)
// 规则: 组内优先取非空链接; 统计考生人数
// ==========================================

use crate::domain::record::{CanonicalField, ExamRecord};
use crate::importer::data_cleaner::normalize_for_search;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEntry {
    /// 展示用的确定性 id
    pub id: String,
    pub exam_date: String,
    pub subject: String,
    pub exam_session: String,
    pub exam_time: String,
    pub exam_room: String,
    pub exam_link: String,
    pub student_count: usize,
}

/// 过滤条件（文本字段不区分声调/大小写的包含匹配,日期精确匹配）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFilter {
    pub subject: Option<String>,
    pub room: Option<String>,
    pub session: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRoster {
    rooms: Vec<RoomEntry>,
}

impl RoomRoster {
    pub fn from_records(records: &[ExamRecord]) -> Self {
        let mut rooms: Vec<RoomEntry> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for record in records {
            let value = |f| record.get(f).unwrap_or_default().to_string();
            let exam_date = value(CanonicalField::ExamDate);
            let subject = value(CanonicalField::Subject);
            let exam_session = value(CanonicalField::ExamSession);
            let exam_time = value(CanonicalField::ExamTime);
            let exam_room = value(CanonicalField::ExamRoom);
            let key = format!("{exam_date}||{subject}||{exam_session}||{exam_time}||{exam_room}");
            let link = value(CanonicalField::ExamLink);

            match positions.get(&key) {
                Some(&pos) => {
                    let entry = &mut rooms[pos];
                    entry.student_count += 1;
                    if entry.exam_link.is_empty() && !link.is_empty() {
                        entry.exam_link = link;
                    }
                }
                None => {
                    positions.insert(key.clone(), rooms.len());
                    rooms.push(RoomEntry {
                        id: key,
                        exam_date,
                        subject,
                        exam_session,
                        exam_time,
                        exam_room,
                        exam_link: link,
                        student_count: 1,
                    });
                }
            }
        }

        Self { rooms }
    }

    pub fn rooms(&self) -> &[RoomEntry] {
        &self.rooms
    }

    /// 缺少链接的考场
    pub fn missing_links(&self) -> Vec<&RoomEntry> {
        self.rooms.iter().filter(|r| r.exam_link.is_empty()).collect()
    }

    pub fn filter(&self, filter: &RoomFilter) -> Vec<&RoomEntry> {
        let contains = |haystack: &str, needle: &Option<String>| match needle {
            Some(n) if !n.trim().is_empty() => {
                normalize_for_search(haystack).contains(&normalize_for_search(n.trim()))
            }
            _ => true,
        };

        self.rooms
            .iter()
            .filter(|r| contains(&r.subject, &filter.subject))
            .filter(|r| contains(&r.exam_room, &filter.room))
            .filter(|r| contains(&r.exam_session, &filter.session))
            .filter(|r| match &filter.date {
                Some(d) if !d.trim().is_empty() => r.exam_date == d.trim(),
                _ => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(room: &str, link: Option<&str>) -> ExamRecord {
        ExamRecord {
            exam_date: Some("2024-05-01".to_string()),
            subject: Some("Toán cao cấp".to_string()),
            exam_session: Some("Sáng".to_string()),
            exam_room: Some(room.to_string()),
            exam_link: link.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_rooms_deduplicated_with_link_preference() {
        let records = vec![
            rec("P101", None),
            rec("P101", Some("https://meet.example/p101")),
            rec("P102", None),
        ];
        let roster = RoomRoster::from_records(&records);

        assert_eq!(roster.rooms().len(), 2);
        assert_eq!(roster.rooms()[0].student_count, 2);
        assert_eq!(roster.rooms()[0].exam_link, "https://meet.example/p101");
        assert_eq!(roster.missing_links().len(), 1);
    }

    #[test]
    fn test_filter_is_diacritic_insensitive() {
        let roster = RoomRoster::from_records(&[rec("P101", None), rec("P202", None)]);
        let filter = RoomFilter {
            subject: Some("toan cao".to_string()),
            room: Some("p1".to_string()),
            ..Default::default()
        };
        let found = roster.filter(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].exam_room, "P101");

        let by_date = RoomFilter {
            date: Some("2024-05-02".to_string()),
            ..Default::default()
        };
        assert!(roster.filter(&by_date).is_empty());
    }
}

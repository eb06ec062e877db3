// ==========================================
// 考试排程对账系统 - 考试记录领域模型
// ==========================================
// 职责: 规范记录 / 规范字段键 / 导入片段 / 分组键
// 红线: 片段只在单次导入运行内存在,不落库
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// CanonicalField - 规范字段键
// ==========================================
// 所有表头同义词最终映射到这一固定集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    StudentId,
    FullName,
    Username,
    Dob,
    ExamDate,
    Subject,
    ExamSession,
    ExamTime,
    ExamRoom,
    Course,
    MajorCode,
    ExamType,
    ExamLink,
    // 辅助键: 姓/名分列时拼接为 fullName
    LastName,
    FirstName,
}

impl CanonicalField {
    /// 转换为字符串标识（与对外 JSON 字段名一致）
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::StudentId => "studentId",
            CanonicalField::FullName => "fullName",
            CanonicalField::Username => "username",
            CanonicalField::Dob => "dob",
            CanonicalField::ExamDate => "examDate",
            CanonicalField::Subject => "subject",
            CanonicalField::ExamSession => "examSession",
            CanonicalField::ExamTime => "examTime",
            CanonicalField::ExamRoom => "examRoom",
            CanonicalField::Course => "course",
            CanonicalField::MajorCode => "majorCode",
            CanonicalField::ExamType => "examType",
            CanonicalField::ExamLink => "examLink",
            CanonicalField::LastName => "lastName",
            CanonicalField::FirstName => "firstName",
        }
    }

    /// 是否为日期类字段（需经过日期规范化）
    pub fn is_date(&self) -> bool {
        matches!(self, CanonicalField::Dob | CanonicalField::ExamDate)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// ExamRecord - 规范记录（一名考生的一场考试）
// ==========================================
// 用途: 记录仓储中的实体,也是导入片段的字段载体
// 说明: 所有字段可空; 日期字段统一为 YYYY-MM-DD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    // ===== 主键（仓储分配）=====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    // ===== 身份信息 =====
    #[serde(default)]
    pub student_id: Option<String>, // 学号 / 准考证号
    #[serde(default)]
    pub full_name: Option<String>, // 姓名
    #[serde(default)]
    pub username: Option<String>, // 登录账号
    #[serde(default)]
    pub dob: Option<String>, // 出生日期

    // ===== 考试信息 =====
    #[serde(default)]
    pub exam_date: Option<String>, // 考试日期
    #[serde(default)]
    pub subject: Option<String>, // 科目
    #[serde(default)]
    pub exam_session: Option<String>, // 场次
    #[serde(default)]
    pub exam_time: Option<String>, // 时间段
    #[serde(default)]
    pub exam_room: Option<String>, // 考场
    #[serde(default)]
    pub course: Option<String>, // 年级/届
    #[serde(default)]
    pub major_code: Option<String>, // 专业代码
    #[serde(default)]
    pub exam_type: Option<String>, // 考试形式
    #[serde(default)]
    pub exam_link: Option<String>, // 线上考场链接
}

impl ExamRecord {
    /// 读取字段（空白视为缺失）
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        let value = match field {
            CanonicalField::StudentId => &self.student_id,
            CanonicalField::FullName => &self.full_name,
            CanonicalField::Username => &self.username,
            CanonicalField::Dob => &self.dob,
            CanonicalField::ExamDate => &self.exam_date,
            CanonicalField::Subject => &self.subject,
            CanonicalField::ExamSession => &self.exam_session,
            CanonicalField::ExamTime => &self.exam_time,
            CanonicalField::ExamRoom => &self.exam_room,
            CanonicalField::Course => &self.course,
            CanonicalField::MajorCode => &self.major_code,
            CanonicalField::ExamType => &self.exam_type,
            CanonicalField::ExamLink => &self.exam_link,
            CanonicalField::LastName | CanonicalField::FirstName => return None,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// 写入字段（空白写入为 None）
    pub fn set(&mut self, field: CanonicalField, value: Option<String>) {
        let value = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let slot = match field {
            CanonicalField::StudentId => &mut self.student_id,
            CanonicalField::FullName => &mut self.full_name,
            CanonicalField::Username => &mut self.username,
            CanonicalField::Dob => &mut self.dob,
            CanonicalField::ExamDate => &mut self.exam_date,
            CanonicalField::Subject => &mut self.subject,
            CanonicalField::ExamSession => &mut self.exam_session,
            CanonicalField::ExamTime => &mut self.exam_time,
            CanonicalField::ExamRoom => &mut self.exam_room,
            CanonicalField::Course => &mut self.course,
            CanonicalField::MajorCode => &mut self.major_code,
            CanonicalField::ExamType => &mut self.exam_type,
            CanonicalField::ExamLink => &mut self.exam_link,
            CanonicalField::LastName | CanonicalField::FirstName => return,
        };
        *slot = value;
    }

    /// 是否携带任一身份字段（studentId / username / fullName）
    pub fn has_identity(&self) -> bool {
        self.get(CanonicalField::StudentId).is_some()
            || self.get(CanonicalField::Username).is_some()
            || self.get(CanonicalField::FullName).is_some()
    }

    /// 应用补全补丁（只写入补丁中出现的字段）
    pub fn apply_patch(&mut self, patch: &FieldPatch) {
        if let Some(date) = &patch.exam_date {
            self.exam_date = Some(date.clone());
        }
        if let Some(link) = &patch.exam_link {
            self.exam_link = Some(link.clone());
        }
    }
}

// ==========================================
// FieldPatch - 字段补全补丁
// ==========================================
// 红线: 自动对账只允许补全 examDate / examLink 两个字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_link: Option<String>,
}

impl FieldPatch {
    pub fn link(link: impl Into<String>) -> Self {
        Self {
            exam_date: None,
            exam_link: Some(link.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exam_date.is_none() && self.exam_link.is_none()
    }

    /// 按实时记录收窄补丁: 去掉已被他人填充的字段
    pub fn restrict_to_empty(&self, live: &ExamRecord) -> FieldPatch {
        FieldPatch {
            exam_date: self
                .exam_date
                .clone()
                .filter(|_| live.get(CanonicalField::ExamDate).is_none()),
            exam_link: self
                .exam_link
                .clone()
                .filter(|_| live.get(CanonicalField::ExamLink).is_none()),
        }
    }

    /// 补丁涉及的字段名（用于日志/诊断）
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.exam_date.is_some() {
            names.push(CanonicalField::ExamDate.as_str());
        }
        if self.exam_link.is_some() {
            names.push(CanonicalField::ExamLink.as_str());
        }
        names
    }
}

// ==========================================
// RecordFragment - 导入片段
// ==========================================
// 一行输入解码后的部分记录,匹配前的中间形态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFragment {
    /// 源文件行号（表头为第 1 行,数据从第 2 行开始）
    pub row_number: usize,
    /// 规范字段
    pub fields: ExamRecord,
    /// 原始单元格（表头, 文本值）,用于诊断上下文
    #[serde(default)]
    pub raw_cells: Vec<(String, String)>,
    /// 行级校验问题（非致命）
    #[serde(default)]
    pub validation_errors: Vec<String>,
    /// 由场次序号推导的时间段: 不参与匹配,只写入新建记录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_exam_time: Option<String>,
}

impl RecordFragment {
    pub fn new(row_number: usize, fields: ExamRecord) -> Self {
        Self {
            row_number,
            fields,
            raw_cells: Vec::new(),
            validation_errors: Vec::new(),
            derived_exam_time: None,
        }
    }

    /// 新建记录时写入的字段（补上推导出的时间段）
    pub fn fields_for_create(&self) -> ExamRecord {
        let mut fields = self.fields.clone();
        fields.id = None;
        if fields.get(CanonicalField::ExamTime).is_none() {
            if let Some(slot) = &self.derived_exam_time {
                fields.exam_time = Some(slot.clone());
            }
        }
        fields
    }

    /// 是否为"只有链接 + 考试元数据"的分组更新行
    pub fn is_link_group_row(&self) -> bool {
        !self.fields.has_identity()
            && self.fields.get(CanonicalField::ExamLink).is_some()
            && (self.fields.get(CanonicalField::ExamRoom).is_some()
                || self.fields.get(CanonicalField::ExamSession).is_some()
                || self.fields.get(CanonicalField::Subject).is_some())
    }
}

// ==========================================
// GroupKey - 考场分组键
// ==========================================
// (examDate, subject, examSession, examTime, examRoom, examType) 规范化后的组合
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    pub exam_date: String,
    pub subject: String,
    pub exam_session: String,
    pub exam_time: String,
    pub exam_room: String,
    pub exam_type: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}||{}||{}||{}||{}||{}",
            self.exam_date,
            self.subject,
            self.exam_session,
            self.exam_time,
            self.exam_room,
            self.exam_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_treats_blank_as_missing() {
        let mut record = ExamRecord::default();
        record.subject = Some("   ".to_string());
        assert_eq!(record.get(CanonicalField::Subject), None);

        record.set(CanonicalField::Subject, Some("  Toán  ".to_string()));
        assert_eq!(record.get(CanonicalField::Subject), Some("Toán"));
    }

    #[test]
    fn test_patch_restrict_to_empty() {
        let patch = FieldPatch {
            exam_date: Some("2024-05-01".to_string()),
            exam_link: Some("https://meet.example/a".to_string()),
        };
        let live = ExamRecord {
            exam_link: Some("https://meet.example/other".to_string()),
            ..Default::default()
        };

        let narrowed = patch.restrict_to_empty(&live);
        assert_eq!(narrowed.exam_date.as_deref(), Some("2024-05-01"));
        assert_eq!(narrowed.exam_link, None);
        assert_eq!(narrowed.field_names(), vec!["examDate"]);
    }

    #[test]
    fn test_link_group_row_detection() {
        let mut fragment = RecordFragment::new(2, ExamRecord::default());
        fragment.fields.exam_link = Some("https://meet.example/p101".to_string());
        fragment.fields.exam_room = Some("P101".to_string());
        assert!(fragment.is_link_group_row());

        fragment.fields.student_id = Some("SV01".to_string());
        assert!(!fragment.is_link_group_row());
    }

    #[test]
    fn test_derived_time_only_in_created_fields() {
        let mut fragment = RecordFragment::new(
            2,
            ExamRecord {
                id: Some("stale".to_string()),
                exam_session: Some("Ca 1".to_string()),
                ..Default::default()
            },
        );
        fragment.derived_exam_time = Some("7h00-8h30".to_string());

        assert_eq!(fragment.fields.exam_time, None);
        let created = fragment.fields_for_create();
        assert_eq!(created.id, None);
        assert_eq!(created.exam_time.as_deref(), Some("7h00-8h30"));

        // 表格中已有时间段时以表格为准
        fragment.fields.exam_time = Some("8h00-9h30".to_string());
        assert_eq!(fragment.fields_for_create().exam_time.as_deref(), Some("8h00-9h30"));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ExamRecord {
            student_id: Some("SV01".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["studentId"], "SV01");
        assert!(json.get("id").is_none());
    }
}

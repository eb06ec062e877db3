// ==========================================
// 考试排程对账系统 - 行规范化
// ==========================================
// 职责: 原始行 + 列绑定 → 导入片段
// 流程:
//   1. 映射列取值（日期列走日期规范化,其余 TRIM）
//   2. 姓/名分列拼接为姓名
//   3. 考场列误填链接时修复（移入链接,从未识别列找回考场号）
//   4. 场次序号推导时间段
//   5. 链接格式校验（行级,非致命）
// ==========================================

use crate::config::import_config::SessionTimeslots;
use crate::domain::record::{CanonicalField, ExamRecord, RecordFragment};
use crate::importer::data_cleaner::{is_short_numeric_token, is_valid_url};
use crate::importer::date_normalizer::{normalize_date, DateInput, DateOptions};
use crate::importer::file_parser::{CellValue, RawRow};
use crate::importer::header_mapper::{ColumnDisposition, HeaderMap};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// 行级校验问题
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    InvalidLink(String),
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowError::InvalidLink(link) => write!(f, "链接格式无效（需 http/https 绝对地址）: {link}"),
        }
    }
}

// ==========================================
// RowCanonicalizer
// ==========================================
#[derive(Debug, Clone)]
pub struct RowCanonicalizer {
    header_map: HeaderMap,
    date_options: DateOptions,
    timeslots: SessionTimeslots,
}

impl RowCanonicalizer {
    pub fn new(
        header_map: HeaderMap,
        date_options: DateOptions,
        timeslots: SessionTimeslots,
    ) -> Self {
        Self {
            header_map,
            date_options,
            timeslots,
        }
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.header_map
    }

    /// 原始行 → 导入片段
    pub fn canonicalize(&self, row: &RawRow) -> RecordFragment {
        let headers = &self.header_map.diagnostics().raw_headers;
        let mut fragment = RecordFragment::new(row.row_number, ExamRecord::default());
        fragment.raw_cells = row.context(headers);

        let mut last_name: Option<String> = None;
        let mut first_name: Option<String> = None;

        for binding in self.header_map.columns() {
            let field = match binding.disposition {
                ColumnDisposition::Mapped(field) => field,
                _ => continue,
            };
            let cell = match row.cell(binding.index) {
                Some(cell) if !cell.is_empty() => cell,
                _ => continue,
            };

            match field {
                CanonicalField::LastName => last_name = Some(cell.as_text()),
                CanonicalField::FirstName => first_name = Some(cell.as_text()),
                f if f.is_date() => {
                    let value = self.normalize_date_cell(cell);
                    if value.is_empty() {
                        debug!(
                            row_number = row.row_number,
                            field = %f,
                            raw = %cell.as_text(),
                            "日期无法解析,按空处理"
                        );
                    }
                    fragment.fields.set(f, Some(value));
                }
                f => fragment.fields.set(f, Some(cell.as_text())),
            }
        }

        compose_full_name(&mut fragment.fields, last_name, first_name);
        self.repair_room_link(row, &mut fragment);
        fragment.derived_exam_time = self.derive_exam_time(&fragment.fields);

        if let Some(link) = fragment.fields.get(CanonicalField::ExamLink) {
            if !is_valid_url(link) {
                fragment
                    .validation_errors
                    .push(RowError::InvalidLink(link.to_string()).to_string());
            }
        }

        fragment
    }

    fn normalize_date_cell(&self, cell: &CellValue) -> String {
        let input = match cell {
            CellValue::Number(n) | CellValue::DateTime(n) => DateInput::Serial(*n),
            CellValue::Text(text) => DateInput::Text(text.clone()),
            CellValue::Bool(_) | CellValue::Empty => return String::new(),
        };
        normalize_date(&input, self.date_options)
    }

    /// 考场列内容是链接时: 移入链接列,再从未识别列中找回考场号
    fn repair_room_link(&self, row: &RawRow, fragment: &mut RecordFragment) {
        let room = match fragment.fields.get(CanonicalField::ExamRoom) {
            Some(room) if is_valid_url(room) => room.to_string(),
            _ => return,
        };

        if fragment.fields.get(CanonicalField::ExamLink).is_none() {
            fragment.fields.set(CanonicalField::ExamLink, Some(room.clone()));
        }

        let recovered = self
            .header_map
            .columns()
            .iter()
            .filter(|c| c.disposition == ColumnDisposition::Unmapped)
            .filter_map(|c| row.cell(c.index))
            .map(CellValue::as_text)
            .find(|text| is_short_numeric_token(text));

        debug!(
            row_number = row.row_number,
            moved_link = %room,
            recovered_room = ?recovered,
            "考场列包含链接,已修复"
        );
        fragment.fields.set(CanonicalField::ExamRoom, recovered);
    }

    /// 场次含唯一的 1-6 序号且无时间段时,按时间段表推导
    ///
    /// 推导值不写入比较字段: 库内同场次记录通常没有时间段
    fn derive_exam_time(&self, fields: &ExamRecord) -> Option<String> {
        if fields.get(CanonicalField::ExamTime).is_some() {
            return None;
        }
        let ordinal = fields.get(CanonicalField::ExamSession).and_then(session_ordinal)?;
        self.timeslots.get(ordinal).map(str::to_string)
    }
}

/// 场次文本中唯一的单个数字（1-6）
pub fn session_ordinal(session: &str) -> Option<u8> {
    let runs: Vec<&str> = DIGIT_RUN.find_iter(session).map(|m| m.as_str()).collect();
    match runs.as_slice() {
        [single] if single.len() == 1 => {
            let digit: u8 = single.parse().ok()?;
            (1..=6).contains(&digit).then_some(digit)
        }
        _ => None,
    }
}

fn compose_full_name(fields: &mut ExamRecord, last: Option<String>, first: Option<String>) {
    if fields.get(CanonicalField::FullName).is_some() {
        return;
    }
    let composed = [last, first]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    fields.set(CanonicalField::FullName, Some(composed));
}

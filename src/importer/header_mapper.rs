// ==========================================
// 考试排程对账系统 - 表头映射器
// ==========================================
// 职责: 原始表头 → 规范字段键
// 规则: 有序、数据驱动的规则表,首个命中即返回;
//       越具体的规则越靠前（避免泛化规则吞掉 "Mã môn" 之类的列）
// ==========================================

use crate::domain::record::CanonicalField;
use crate::domain::report::HeaderDiagnostics;
use crate::importer::data_cleaner::normalize_header;
use regex::Regex;
use tracing::{debug, info};

// ==========================================
// 规则定义
// ==========================================

/// 规则谓词（作用于规范化后的表头）
#[derive(Debug, Clone)]
pub enum HeaderPredicate {
    /// 整体等于任一候选
    Exact(&'static [&'static str]),
    /// 包含任一片段
    Contains(&'static [&'static str]),
    /// 同时包含全部片段
    ContainsAll(&'static [&'static str]),
    /// 正则匹配
    Pattern(Regex),
}

impl HeaderPredicate {
    pub fn matches(&self, normalized: &str) -> bool {
        match self {
            HeaderPredicate::Exact(options) => options.iter().any(|o| normalized == *o),
            HeaderPredicate::Contains(parts) => parts.iter().any(|p| normalized.contains(p)),
            HeaderPredicate::ContainsAll(parts) => parts.iter().all(|p| normalized.contains(p)),
            HeaderPredicate::Pattern(re) => re.is_match(normalized),
        }
    }
}

/// 规则目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderTarget {
    Field(CanonicalField),
    /// 显式忽略（序号列、题号/科目代码列等）
    Ignore,
}

/// 单条映射规则
#[derive(Debug, Clone)]
pub struct HeaderRule {
    pub name: &'static str,
    pub predicate: HeaderPredicate,
    pub target: HeaderTarget,
}

impl HeaderRule {
    fn field(name: &'static str, predicate: HeaderPredicate, field: CanonicalField) -> Self {
        Self {
            name,
            predicate,
            target: HeaderTarget::Field(field),
        }
    }

    fn ignore(name: &'static str, predicate: HeaderPredicate) -> Self {
        Self {
            name,
            predicate,
            target: HeaderTarget::Ignore,
        }
    }
}

/// 单个表头的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    Mapped(CanonicalField),
    Ignored,
    Unmapped,
}

fn pattern(re: &str) -> HeaderPredicate {
    // 规则表中的正则均为常量,构造失败属于编码错误
    let regex = Regex::new(re).unwrap_or_else(|e| panic!("header rule regex {re}: {e}"));
    HeaderPredicate::Pattern(regex)
}

/// 默认规则表（顺序即优先级）
pub fn default_rules() -> Vec<HeaderRule> {
    use CanonicalField as F;
    use HeaderPredicate::{Contains, ContainsAll, Exact};

    vec![
        // ===== 序号列 =====
        HeaderRule::ignore("ordinal", Exact(&["stt", "sothutu", "tt"])),
        // ===== 姓名（整列）=====
        HeaderRule::field(
            "full_name",
            Exact(&[
                "hoten",
                "hovaten",
                "hotenvaten",
                "hotensinhvien",
                "hovatensinhvien",
                "hotenthisinh",
                "tensinhvien",
                "tenthisinh",
                "fullname",
                "name",
            ]),
            F::FullName,
        ),
        // ===== 代码类列: 题号/科目代码,不得落入学号或科目 =====
        HeaderRule::ignore(
            "subject_or_paper_code",
            pattern(r"(made|mamon|mahocphan|mahp|subjectcode|papercode)"),
        ),
        // ===== 专业代码 =====
        HeaderRule::field("major_code", Contains(&["manganh", "majorcode"]), F::MajorCode),
        HeaderRule::field("major_code_split", ContainsAll(&["ma", "nganh"]), F::MajorCode),
        // ===== 学号 / 准考证号 =====
        HeaderRule::field(
            "student_id",
            pattern(concat!(
                r"(masv|mssv|msv|sbd|sobaodanh|sobadanh|sobd|masinhvien|mssinhvien|mahocvien",
                r"|studentid|rollnumber|rollno|seatnumber)",
            )),
            F::StudentId,
        ),
        // ===== 账号 =====
        HeaderRule::field(
            "username",
            Contains(&["username", "tendangnhap", "taikhoan", "account", "login"]),
            F::Username,
        ),
        // ===== 姓/名分列 =====
        HeaderRule::field("last_name", Exact(&["ho", "holot", "hodem", "lastname"]), F::LastName),
        HeaderRule::field("first_name", Exact(&["ten", "firstname"]), F::FirstName),
        // ===== 考试日期（须在 dob 的泛化 "date" 规则之前）=====
        HeaderRule::field(
            "exam_date",
            Contains(&["ngaythi", "examdate", "ngaykiemtra"]),
            F::ExamDate,
        ),
        HeaderRule::field("exam_date_split", ContainsAll(&["ngay", "thi"]), F::ExamDate),
        // ===== 出生日期 =====
        HeaderRule::field("dob", Contains(&["ngaysinh", "dob", "birth"]), F::Dob),
        HeaderRule::field("dob_generic_date", Contains(&["date"]), F::Dob),
        // ===== 链接（须在考场之前: "Link phòng"）=====
        HeaderRule::field("exam_link", Contains(&["link", "url", "meet", "zoom"]), F::ExamLink),
        // ===== 科目 =====
        HeaderRule::field(
            "subject",
            Contains(&["tenmon", "monhoc", "monthi", "hocphan", "subject", "mon"]),
            F::Subject,
        ),
        // ===== 场次 =====
        HeaderRule::field("exam_session", Contains(&["cathi", "session"]), F::ExamSession),
        HeaderRule::field("exam_session_split", ContainsAll(&["ca", "thi"]), F::ExamSession),
        HeaderRule::field("exam_session_short", Exact(&["ca"]), F::ExamSession),
        // ===== 时间段 =====
        HeaderRule::field("exam_time", Contains(&["thoigian", "giothi", "examtime"]), F::ExamTime),
        HeaderRule::field("exam_time_short", Exact(&["time", "gio"]), F::ExamTime),
        // ===== 考试形式 =====
        HeaderRule::field("exam_type", Contains(&["hinhthuc", "examtype", "hinh"]), F::ExamType),
        // ===== 考场 =====
        HeaderRule::field("exam_room", Contains(&["phong", "room", "diadiem"]), F::ExamRoom),
        // ===== 年级/届 =====
        HeaderRule::field("course", Contains(&["khoa", "course", "nienkhoa"]), F::Course),
    ]
}

// ==========================================
// HeaderMapper - 表头映射器
// ==========================================
#[derive(Debug, Clone)]
pub struct HeaderMapper {
    rules: Vec<HeaderRule>,
}

impl Default for HeaderMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderMapper {
    /// 使用默认规则表
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// 使用自定义规则表（顺序即优先级）
    pub fn with_rules(rules: Vec<HeaderRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[HeaderRule] {
        &self.rules
    }

    /// 分类单个表头,返回命中结果与规则名
    pub fn classify(&self, raw_header: &str) -> (HeaderMatch, Option<&'static str>) {
        let normalized = normalize_header(raw_header);
        if normalized.is_empty() {
            return (HeaderMatch::Unmapped, None);
        }

        for rule in &self.rules {
            if rule.predicate.matches(&normalized) {
                let result = match rule.target {
                    HeaderTarget::Field(field) => HeaderMatch::Mapped(field),
                    HeaderTarget::Ignore => HeaderMatch::Ignored,
                };
                return (result, Some(rule.name));
            }
        }

        (HeaderMatch::Unmapped, None)
    }

    /// 原始表头 → 规范字段（忽略与未识别均返回 None）
    pub fn map(&self, raw_header: &str) -> Option<CanonicalField> {
        match self.classify(raw_header).0 {
            HeaderMatch::Mapped(field) => Some(field),
            HeaderMatch::Ignored | HeaderMatch::Unmapped => None,
        }
    }

    /// 为整张表构建列绑定与诊断信息
    ///
    /// # 规则
    /// - 同一字段被多列命中时,最左侧的列生效,其余列记入 shadowed
    pub fn build_header_map(&self, headers: &[String]) -> HeaderMap {
        let mut columns = Vec::with_capacity(headers.len());
        let mut diagnostics = HeaderDiagnostics {
            raw_headers: headers.to_vec(),
            ..Default::default()
        };

        for (index, header) in headers.iter().enumerate() {
            let (matched, rule) = self.classify(header);
            let disposition = match matched {
                HeaderMatch::Mapped(field) => {
                    if diagnostics.mapped.iter().any(|(f, _)| *f == field) {
                        diagnostics.shadowed.push(header.clone());
                        ColumnDisposition::Shadowed(field)
                    } else {
                        diagnostics.mapped.push((field, header.clone()));
                        ColumnDisposition::Mapped(field)
                    }
                }
                HeaderMatch::Ignored => {
                    diagnostics.ignored.push(header.clone());
                    ColumnDisposition::Ignored
                }
                HeaderMatch::Unmapped => {
                    if !header.trim().is_empty() {
                        diagnostics.unmapped.push(header.clone());
                    }
                    ColumnDisposition::Unmapped
                }
            };
            debug!(
                column = index,
                header = %header,
                rule = ?rule,
                disposition = ?disposition,
                "表头分类"
            );
            columns.push(ColumnBinding {
                index,
                header: header.clone(),
                disposition,
            });
        }

        info!(
            mapped = diagnostics.mapped.len(),
            ignored = diagnostics.ignored.len(),
            unmapped = diagnostics.unmapped.len(),
            shadowed = diagnostics.shadowed.len(),
            "表头映射完成"
        );
        if !diagnostics.unmapped.is_empty() {
            info!(headers = ?diagnostics.unmapped, "未识别的表头将被忽略");
        }

        HeaderMap {
            columns,
            diagnostics,
        }
    }
}

// ==========================================
// HeaderMap - 单个文件的列绑定
// ==========================================

/// 列处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDisposition {
    Mapped(CanonicalField),
    Shadowed(CanonicalField),
    Ignored,
    Unmapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub index: usize,
    pub header: String,
    pub disposition: ColumnDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    columns: Vec<ColumnBinding>,
    diagnostics: HeaderDiagnostics,
}

impl HeaderMap {
    pub fn columns(&self) -> &[ColumnBinding] {
        &self.columns
    }

    pub fn diagnostics(&self) -> &HeaderDiagnostics {
        &self.diagnostics
    }

    /// 按表头名查找生效字段
    pub fn field_for(&self, header: &str) -> Option<CanonicalField> {
        self.columns.iter().find(|c| c.header == header).and_then(|c| match c.disposition {
            ColumnDisposition::Mapped(field) => Some(field),
            _ => None,
        })
    }

    /// 某字段是否有列映射
    pub fn has_field(&self, field: CanonicalField) -> bool {
        self.diagnostics.mapped.iter().any(|(f, _)| *f == field)
    }

    /// 是否至少映射到一个可用于身份或分组的表头
    pub fn has_required(&self) -> bool {
        [
            CanonicalField::StudentId,
            CanonicalField::FullName,
            CanonicalField::LastName,
            CanonicalField::FirstName,
            CanonicalField::Username,
            CanonicalField::ExamSession,
            CanonicalField::ExamRoom,
            CanonicalField::ExamLink,
        ]
        .iter()
        .any(|f| self.has_field(*f))
    }
}

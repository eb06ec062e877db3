// ==========================================
// 考试排程对账系统 - 数据清洗与规范化
// ==========================================
// 职责: TRIM / NULL 标准化 / 去声调 / 比较用规范化
// 说明: 匹配、分组、表头映射共用这里的规则,
//       保证同一值在各处得到同一规范形态
// ==========================================

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use url::Url;

// 各类 unicode 连字符/减号
static UNICODE_DASHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{2010}\u{2011}\u{2012}\u{2013}\u{2014}\u{2212}]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TIME_COLON: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*:\s*").unwrap());
static TIME_HYPHEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*").unwrap());
static TIME_LEADING_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b0+(\d)h").unwrap());
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static SHORT_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,4}$").unwrap());

/// TRIM + 空值标准化（空字符串/空白 → None）
pub fn clean_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// 去除声调与附加符号（NFD 分解后丢弃组合符; đ/Đ 单独处理）
pub fn strip_diacritics(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' => 'd',
            'Đ' => 'D',
            other => other,
        })
        .collect()
}

/// 表头规范化: 去声调 → 只保留字母数字 → 小写
///
/// "Mã SV" → "masv", "Họ và tên" → "hovaten", "Link phòng" → "linkphong"
pub fn normalize_header(raw: &str) -> String {
    strip_diacritics(raw)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 通用文本比较规范化（科目/场次/考场等）
///
/// NFKC → 统一连字符 → 折叠空白 → 小写
pub fn normalize_text(value: &str) -> String {
    let composed: String = value.nfkc().collect();
    let dashed = UNICODE_DASHES.replace_all(&composed, "-");
    let collapsed = WHITESPACE.replace_all(dashed.trim(), " ");
    collapsed.to_lowercase()
}

/// 考试时间规范化
///
/// "07h30–08h30" / "7h30 - 8h30" / "07:30 - 08:30" 规范化后相同
pub fn normalize_exam_time(value: &str) -> String {
    let composed: String = value.nfkc().collect();
    let dashed = UNICODE_DASHES.replace_all(&composed, "-");
    let unified = TIME_COLON.replace_all(&dashed, "h");
    let hyphen = TIME_HYPHEN.replace_all(&unified, "-");
    let compact = WHITESPACE.replace_all(&hyphen, "");
    let stripped = TIME_LEADING_ZERO.replace_all(&compact, "${1}h");
    stripped.to_lowercase()
}

/// 身份字段规范化（学号/账号）: TRIM + 小写
pub fn normalize_identity(value: &str) -> String {
    value.trim().to_lowercase()
}

/// 搜索用规范化: 去声调 + 小写（不去空格）
pub fn normalize_for_search(value: &str) -> String {
    strip_diacritics(value).to_lowercase()
}

/// 提取考场中的数字部分: "Phòng 101" → "101", "P.A-203" → "203"
///
/// 多段数字以 '-' 连接,无数字返回 None
pub fn room_digits(value: &str) -> Option<String> {
    let runs: Vec<&str> = DIGIT_RUN.find_iter(value).map(|m| m.as_str()).collect();
    if runs.is_empty() {
        None
    } else {
        Some(runs.join("-"))
    }
}

/// 短数字串（1-4 位）,用于从整行中找回考场号
pub fn is_short_numeric_token(value: &str) -> bool {
    SHORT_NUMERIC.is_match(value.trim())
}

/// 链接校验: 只接受 http/https 绝对地址
pub fn is_valid_url(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    match Url::parse(trimmed) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

// ==========================================
// 考试排程对账系统 - 日期规范化
// ==========================================
// 职责: 异构日期表示 → "YYYY-MM-DD"（无法解析返回空串,不报错）
// 优先级: 结构化时间戳 > 原生日期时间 > 序列日数 > 日在前文本 > 通用解析
// 红线: 一律按 UTC 取年月日,表格日期单元格没有时区
// ==========================================

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// 1900 纪元序列日数与 Unix 纪元的偏移
pub const STANDARD_EPOCH_OFFSET: f64 = 25569.0;
/// 1904 纪元序列日数与 Unix 纪元的偏移
pub const ALTERNATE_EPOCH_OFFSET: f64 = 24107.0;

const MS_PER_DAY: f64 = 86_400_000.0;

static DAY_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})$").unwrap());

// 通用解析尝试的纯日期格式
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
];

// 通用解析尝试的日期时间格式
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// 日期输入（各解码器产出的日期形态）
#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    /// 结构化时间戳（秒 + 纳秒,UTC）
    Timestamp { seconds: i64, nanos: u32 },
    /// 原生日期时间
    DateTime(DateTime<Utc>),
    /// 表格序列日数
    Serial(f64),
    /// 文本
    Text(String),
}

/// 规范化选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateOptions {
    /// 工作簿使用 1904 纪元
    pub use_alternate_epoch: bool,
}

/// 规范化为 "YYYY-MM-DD",失败返回空串
pub fn normalize_date(input: &DateInput, options: DateOptions) -> String {
    to_naive_date(input, options)
        .map(format_date)
        .unwrap_or_default()
}

/// 文本快捷入口
pub fn normalize_date_text(text: &str) -> String {
    normalize_date(&DateInput::Text(text.to_string()), DateOptions::default())
}

/// 解析规范日期串（只接受 YYYY-MM-DD）
pub fn parse_canonical(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

fn format_date(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

fn to_naive_date(input: &DateInput, options: DateOptions) -> Option<NaiveDate> {
    match input {
        DateInput::Timestamp { seconds, nanos } => {
            DateTime::from_timestamp(*seconds, *nanos).map(|dt| dt.date_naive())
        }
        DateInput::DateTime(dt) => Some(dt.date_naive()),
        DateInput::Serial(serial) => serial_to_date(*serial, options),
        DateInput::Text(text) => parse_text(text),
    }
}

/// 序列日数 → 日期
///
/// 先四舍五入到毫秒再按天向下取整,避免浮点误差导致差一天
pub fn serial_to_date(serial: f64, options: DateOptions) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let offset = if options.use_alternate_epoch {
        ALTERNATE_EPOCH_OFFSET
    } else {
        STANDARD_EPOCH_OFFSET
    };

    let ms = ((serial - offset) * MS_PER_DAY).round();
    if ms.abs() > i64::MAX as f64 / 2.0 {
        return None;
    }
    let days = (ms as i64).div_euclid(MS_PER_DAY as i64);

    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    epoch.checked_add_signed(Duration::try_days(days)?)
}

fn parse_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // 日在前: D/M/Y 或 D-M-Y
    if let Some(caps) = DAY_FIRST.captures(trimmed) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year_raw = &caps[3];
        let mut year: i32 = year_raw.parse().ok()?;
        if year_raw.len() == 2 {
            year += 2000;
        }
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    parse_general(trimmed)
}

fn parse_general(text: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    // 带时区偏移: 取书写时的日历日期
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.date_naive());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const STD: DateOptions = DateOptions {
        use_alternate_epoch: false,
    };
    const ALT: DateOptions = DateOptions {
        use_alternate_epoch: true,
    };

    #[test]
    fn test_serial_standard_epoch() {
        // 45413 = 2024-05-01（1900 纪元）
        assert_eq!(normalize_date(&DateInput::Serial(45413.0), STD), "2024-05-01");
        // 带时间部分的序列值仍落在同一天
        assert_eq!(normalize_date(&DateInput::Serial(45413.75), STD), "2024-05-01");
        // 25569 = 1970-01-01
        assert_eq!(normalize_date(&DateInput::Serial(25569.0), STD), "1970-01-01");
    }

    #[test]
    fn test_serial_alternate_epoch() {
        // 同一天在 1904 纪元下小 1462
        assert_eq!(normalize_date(&DateInput::Serial(43951.0), ALT), "2024-05-01");
        assert_eq!(normalize_date(&DateInput::Serial(0.0), ALT), "1904-01-01");
    }

    #[test]
    fn test_serial_rounding_guard() {
        // 浮点误差: 略小于整天仍取当天
        let almost = 45413.0 - 1e-9;
        assert_eq!(normalize_date(&DateInput::Serial(almost), STD), "2024-05-01");
        assert_eq!(normalize_date(&DateInput::Serial(f64::NAN), STD), "");
    }

    #[test]
    fn test_day_first_text() {
        assert_eq!(normalize_date_text("01/05/2024"), "2024-05-01");
        assert_eq!(normalize_date_text("1-5-2024"), "2024-05-01");
        assert_eq!(normalize_date_text("15/08/24"), "2024-08-15");
        // 月份越界不猜测
        assert_eq!(normalize_date_text("05/13/2024"), "");
    }

    #[test]
    fn test_general_text() {
        assert_eq!(normalize_date_text("2024-05-01"), "2024-05-01");
        assert_eq!(normalize_date_text("2024/05/01"), "2024-05-01");
        assert_eq!(normalize_date_text("2024-05-01T08:30:00"), "2024-05-01");
        assert_eq!(normalize_date_text("2024-05-01T23:30:00+07:00"), "2024-05-01");
        assert_eq!(normalize_date_text("01.05.2024"), "2024-05-01");
    }

    #[test]
    fn test_unparseable_returns_empty() {
        assert_eq!(normalize_date_text(""), "");
        assert_eq!(normalize_date_text("không rõ"), "");
        assert_eq!(normalize_date_text("tuần sau"), "");
    }

    #[test]
    fn test_native_datetime_uses_utc_date() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();
        assert_eq!(normalize_date(&DateInput::DateTime(dt), STD), "2024-05-01");
    }

    #[test]
    fn test_structured_timestamp() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 1).unwrap();
        let input = DateInput::Timestamp {
            seconds: dt.timestamp(),
            nanos: 0,
        };
        assert_eq!(normalize_date(&input, STD), "2024-05-01");
    }

    #[test]
    fn test_round_trip_all_representations() {
        let expected = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let inputs = [
            (DateInput::Serial(45291.0), STD),
            (DateInput::Serial(45291.0 - 1462.0), ALT),
            (DateInput::Text("31/12/2023".to_string()), STD),
            (
                DateInput::DateTime(Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap()),
                STD,
            ),
        ];
        for (input, options) in inputs {
            let normalized = normalize_date(&input, options);
            assert_eq!(parse_canonical(&normalized), Some(expected), "{input:?}");
        }
    }
}

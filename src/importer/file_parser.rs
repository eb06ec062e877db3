// ==========================================
// 考试排程对账系统 - 表格解码器
// ==========================================
// 职责: 分隔文本 / 表格二进制 → 有序原始行（表头 → 单元格）
// 支持: CSV/TSV (.csv/.tsv/.txt) / Excel & ODS (.xlsx/.xlsm/.xls/.xlsb/.ods)
// 说明: 多工作表时按标记名选择; 从工作簿属性提取 1904 纪元标志
// ==========================================

use crate::domain::types::SourceFormat;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use csv::ReaderBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const ZIP_MAGIC: &[u8] = b"PK";

static DATE1904_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"date1904\s*=\s*["'](1|true)["']"#).unwrap());

// ==========================================
// CellValue - 原始单元格
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// 日期单元格（原始序列日数,纪元由 TableMetadata 决定）
    DateTime(f64),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 文本形态（整数值不带小数点）
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) | CellValue::DateTime(n) => format_number(*n),
            CellValue::Bool(b) => b.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => {
                debug!(error = ?e, "单元格包含错误值,按空处理");
                CellValue::Empty
            }
        }
    }
}

// ==========================================
// 解码结果
// ==========================================

/// 一行原始数据（单元格与表头按列对齐）
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 源文件行号（表头为第 1 行）
    pub row_number: usize,
    pub cells: Vec<CellValue>,
}

impl RawRow {
    pub fn cell(&self, index: usize) -> Option<&CellValue> {
        self.cells.get(index)
    }

    /// (表头, 文本值) 对,跳过空单元格
    pub fn context(&self, headers: &[String]) -> Vec<(String, String)> {
        headers
            .iter()
            .zip(self.cells.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(h, cell)| (h.clone(), cell.as_text()))
            .collect()
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMetadata {
    pub format: Option<SourceFormat>,
    pub sheet_name: Option<String>,
    /// 工作簿使用 1904 纪元
    pub alternate_epoch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub metadata: TableMetadata,
}

// ==========================================
// FileParser Trait
// ==========================================
// 实现者: CsvParser, ExcelParser
pub trait FileParser: Send + Sync {
    /// 解码文件字节为表格
    fn decode(&self, bytes: &[u8]) -> ImportResult<DecodedTable>;
}

// ==========================================
// CSV Parser 实现
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    /// 固定分隔符; None 时按表头行嗅探
    delimiter: Option<u8>,
}

impl CsvParser {
    pub fn new(delimiter: Option<u8>) -> Self {
        Self { delimiter }
    }

    /// 按表头行中出现次数最多的候选分隔符（引号外）选择
    fn sniff_delimiter(bytes: &[u8]) -> u8 {
        let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
        let mut counts = [(b',', 0usize), (b';', 0), (b'\t', 0)];
        let mut in_quotes = false;
        for b in first_line {
            if *b == b'"' {
                in_quotes = !in_quotes;
                continue;
            }
            if in_quotes {
                continue;
            }
            for (candidate, count) in counts.iter_mut() {
                if b == candidate {
                    *count += 1;
                }
            }
        }
        counts
            .iter()
            .max_by_key(|(_, count)| *count)
            .filter(|(_, count)| *count > 0)
            .map(|(d, _)| *d)
            .unwrap_or(b',')
    }
}

impl FileParser for CsvParser {
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    fn decode(&self, bytes: &[u8]) -> ImportResult<DecodedTable> {
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ImportError::EmptyFile);
        }

        let delimiter = self.delimiter.unwrap_or_else(|| Self::sniff_delimiter(body));
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true) // 允许行长度不一致
            .from_reader(body);

        // 读取表头（非 UTF-8 字节按有损转换）
        let headers: Vec<String> = reader
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, result) in reader.byte_records().enumerate() {
            let record = result?;
            let row_number = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2);

            let mut cells: Vec<CellValue> = record
                .iter()
                .take(headers.len())
                .map(|raw| {
                    let text = String::from_utf8_lossy(raw).trim().to_string();
                    if text.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(text)
                    }
                })
                .collect();
            cells.resize(headers.len(), CellValue::Empty);

            let row = RawRow { row_number, cells };
            // 跳过完全空白的行
            if row.is_blank() {
                continue;
            }
            rows.push(row);
        }

        info!(
            delimiter = %(delimiter as char).escape_default(),
            columns = headers.len(),
            rows = rows.len(),
            "CSV 解码完成"
        );

        Ok(DecodedTable {
            headers,
            rows,
            metadata: TableMetadata {
                format: Some(SourceFormat::Csv),
                sheet_name: None,
                alternate_epoch: false,
            },
        })
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
#[derive(Debug, Clone)]
pub struct ExcelParser {
    /// 多工作表时要求的工作表名（不区分大小写）
    marker_sheet: String,
}

impl Default for ExcelParser {
    fn default() -> Self {
        Self::new("Data")
    }
}

impl ExcelParser {
    pub fn new(marker_sheet: impl Into<String>) -> Self {
        Self {
            marker_sheet: marker_sheet.into(),
        }
    }

    /// 选择工作表: 唯一工作表直接使用; 多个时按标记名选择
    pub fn select_sheet(&self, sheet_names: &[String]) -> ImportResult<String> {
        match sheet_names {
            [] => Err(ImportError::NoSheets),
            [only] => Ok(only.clone()),
            many => many
                .iter()
                .find(|name| name.trim().eq_ignore_ascii_case(self.marker_sheet.trim()))
                .cloned()
                .ok_or_else(|| ImportError::NamedSheetRequired {
                    marker: self.marker_sheet.clone(),
                    available: many.to_vec(),
                }),
        }
    }

    fn range_to_table(range: &Range<Data>) -> ImportResult<(Vec<String>, Vec<RawRow>)> {
        let start_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

        // 提取表头（第一行）
        let mut rows = range.rows();
        let header_row = rows.next().ok_or(ImportError::NoUsableRows)?;
        let headers: Vec<String> = header_row
            .iter()
            .map(|cell| CellValue::from(cell).as_text())
            .collect();

        // 读取数据行
        let mut records = Vec::new();
        for (offset, data_row) in rows.enumerate() {
            let mut cells: Vec<CellValue> = data_row.iter().map(CellValue::from).collect();
            cells.resize(headers.len(), CellValue::Empty);
            let row = RawRow {
                // 表格行号从 1 开始,表头占一行
                row_number: start_row + offset + 2,
                cells,
            };
            // 跳过完全空白的行
            if row.is_blank() {
                continue;
            }
            records.push(row);
        }

        Ok((headers, records))
    }
}

impl FileParser for ExcelParser {
    #[instrument(skip(self, bytes), fields(len = bytes.len(), marker = %self.marker_sheet))]
    fn decode(&self, bytes: &[u8]) -> ImportResult<DecodedTable> {
        if bytes.is_empty() {
            return Err(ImportError::EmptyFile);
        }

        let alternate_epoch = detect_alternate_epoch(bytes);

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
        let sheet_names = workbook.sheet_names();
        let sheet_name = self.select_sheet(&sheet_names)?;

        let range = workbook.worksheet_range(&sheet_name)?;
        let (headers, rows) = Self::range_to_table(&range)?;

        info!(
            sheet = %sheet_name,
            sheets = sheet_names.len(),
            alternate_epoch,
            columns = headers.len(),
            rows = rows.len(),
            "工作簿解码完成"
        );

        Ok(DecodedTable {
            headers,
            rows,
            metadata: TableMetadata {
                format: Some(SourceFormat::Binary),
                sheet_name: Some(sheet_name),
                alternate_epoch,
            },
        })
    }
}

/// 读取 xl/workbook.xml 中 workbookPr 的 date1904 属性
///
/// 非 zip 容器（如旧版 .xls）或读取失败时返回 false
pub fn detect_alternate_epoch(bytes: &[u8]) -> bool {
    if !bytes.starts_with(ZIP_MAGIC) {
        return false;
    }
    match read_workbook_xml(bytes) {
        Ok(Some(xml)) => DATE1904_ATTR.is_match(&xml),
        Ok(None) => false,
        Err(e) => {
            warn!(error = %e, "读取工作簿属性失败,按 1900 纪元处理");
            false
        }
    }
}

fn read_workbook_xml(bytes: &[u8]) -> ImportResult<Option<String>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = match archive.by_name("xl/workbook.xml") {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

// ==========================================
// 通用文件解析器（按格式提示或扩展名选择）
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct UniversalFileParser {
    csv: CsvParser,
    excel: ExcelParser,
}

impl UniversalFileParser {
    pub fn new(csv_delimiter: Option<u8>, marker_sheet: impl Into<String>) -> Self {
        Self {
            csv: CsvParser::new(csv_delimiter),
            excel: ExcelParser::new(marker_sheet),
        }
    }

    /// 按格式提示解码
    pub fn decode(&self, bytes: &[u8], hint: SourceFormat) -> ImportResult<DecodedTable> {
        match hint {
            SourceFormat::Csv => self.csv.decode(bytes),
            SourceFormat::Binary => self.excel.decode(bytes),
        }
    }

    /// 读取文件并按扩展名解码
    pub fn parse<P: AsRef<Path>>(&self, file_path: P) -> ImportResult<DecodedTable> {
        let path = file_path.as_ref();
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let hint = SourceFormat::from_extension(&ext)
            .ok_or_else(|| ImportError::UnsupportedFormat(ext.clone()))?;

        let bytes = std::fs::read(path)?;
        self.decode(&bytes, hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_csv_parser_basic() {
        let data = "Mã SV,Họ tên,Ngày thi\n\
                    SV01,Nguyễn Văn A,01/05/2024\n\
                    SV02,Trần Thị B,02/05/2024\n";
        let table = CsvParser::default().decode(data.as_bytes()).unwrap();

        assert_eq!(table.headers, vec!["Mã SV", "Họ tên", "Ngày thi"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_number, 2);
        assert_eq!(table.rows[0].cells[0], CellValue::Text("SV01".to_string()));
        assert!(!table.metadata.alternate_epoch);
    }

    #[test]
    fn test_csv_parser_quotes_and_bom() {
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(
            b"Subject,Note\n\"Toan, cao cap\",\"he said \"\"hi\"\"\"\n",
        );
        let table = CsvParser::default().decode(&data).unwrap();

        assert_eq!(table.headers[0], "Subject");
        assert_eq!(table.rows[0].cells[0].as_text(), "Toan, cao cap");
        assert_eq!(table.rows[0].cells[1].as_text(), "he said \"hi\"");
    }

    #[test]
    fn test_csv_parser_sniffs_semicolon() {
        let data = "MSSV;Phòng\nSV01;P101\n";
        let table = CsvParser::default().decode(data.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["MSSV", "Phòng"]);
        assert_eq!(table.rows[0].cells[1].as_text(), "P101");
    }

    #[test]
    fn test_csv_parser_skip_blank_rows_and_pad() {
        let data = "MSSV,Phòng,Link\nSV01\n,,\nSV02,P101,\n";
        let table = CsvParser::default().decode(data.as_bytes()).unwrap();

        // 应跳过空行
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells.len(), 3);
        assert_eq!(table.rows[1].row_number, 4);
    }

    #[test]
    fn test_csv_parser_empty_file() {
        let err = CsvParser::default().decode(b"  \n").unwrap_err();
        assert!(matches!(err, ImportError::EmptyFile));
    }

    #[test]
    fn test_select_sheet_rules() {
        let parser = ExcelParser::new("Data");
        assert_eq!(
            parser.select_sheet(&["Only".to_string()]).unwrap(),
            "Only"
        );
        assert_eq!(
            parser
                .select_sheet(&["Notes".to_string(), "DATA".to_string()])
                .unwrap(),
            "DATA"
        );
        let err = parser
            .select_sheet(&["Sheet1".to_string(), "Sheet2".to_string()])
            .unwrap_err();
        match err {
            ImportError::NamedSheetRequired { available, .. } => {
                assert_eq!(available, vec!["Sheet1", "Sheet2"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(parser.select_sheet(&[]), Err(ImportError::NoSheets)));
    }

    #[test]
    fn test_detect_alternate_epoch_non_zip() {
        assert!(!detect_alternate_epoch(b"MSSV,Phong\n"));
    }

    #[test]
    fn test_cell_value_text() {
        assert_eq!(CellValue::Number(101.0).as_text(), "101");
        assert_eq!(CellValue::Number(2.5).as_text(), "2.5");
        assert!(CellValue::Text("  ".to_string()).is_empty());
    }

    #[test]
    fn test_universal_parser_by_extension() {
        let mut temp_file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(temp_file, "MSSV,Phòng").unwrap();
        writeln!(temp_file, "SV01,P101").unwrap();

        let parser = UniversalFileParser::default();
        let table = parser.parse(temp_file.path()).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.metadata.format, Some(SourceFormat::Csv));

        let missing = parser.parse("non_existent.csv");
        assert!(matches!(missing, Err(ImportError::FileNotFound(_))));

        let unsupported = Builder::new().suffix(".pdf").tempfile().unwrap();
        assert!(matches!(
            parser.parse(unsupported.path()),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }
}

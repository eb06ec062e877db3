// ==========================================
// 考试排程对账系统 - 考试记录 Repository 实现
// ==========================================
// 职责: 基于 rusqlite 的 RecordStore 实现
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::record::{ExamRecord, FieldPatch};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_store::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

const ENTITY: &str = "ExamRecord";

const SELECT_COLUMNS: &str = "id, student_id, full_name, username, dob, exam_date, subject, \
     exam_session, exam_time, exam_room, course, major_code, exam_type, exam_link";

// ==========================================
// ExamRecordRepositoryImpl
// ==========================================
pub struct ExamRecordRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl ExamRecordRepositoryImpl {
    /// 打开数据库文件并建表
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与 ConfigManager 共享连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = Self::lock(&conn)?;
            init_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 共享底层连接
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(conn: &Arc<Mutex<Connection>>) -> RepositoryResult<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ExamRecord> {
        Ok(ExamRecord {
            id: row.get(0)?,
            student_id: row.get(1)?,
            full_name: row.get(2)?,
            username: row.get(3)?,
            dob: row.get(4)?,
            exam_date: row.get(5)?,
            subject: row.get(6)?,
            exam_session: row.get(7)?,
            exam_time: row.get(8)?,
            exam_room: row.get(9)?,
            course: row.get(10)?,
            major_code: row.get(11)?,
            exam_type: row.get(12)?,
            exam_link: row.get(13)?,
        })
    }
}

#[async_trait]
impl RecordStore for ExamRecordRepositoryImpl {
    #[instrument(skip(self))]
    async fn list_all(&self) -> RepositoryResult<Vec<ExamRecord>> {
        let conn = Self::lock(&self.conn)?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM exam_record ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = records.len(), "读取记录快照");
        Ok(records)
    }

    async fn get(&self, id: &str) -> RepositoryResult<ExamRecord> {
        let conn = Self::lock(&self.conn)?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM exam_record WHERE id = ?1");
        conn.query_row(&sql, params![id], Self::map_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => RepositoryError::not_found(ENTITY, id),
                other => other.into(),
            })
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, fields: ExamRecord) -> RepositoryResult<ExamRecord> {
        let mut record = fields;
        let id = Uuid::new_v4().to_string();
        record.id = Some(id.clone());
        let now = Utc::now().to_rfc3339();

        let conn = Self::lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO exam_record (
                id, student_id, full_name, username, dob, exam_date, subject,
                exam_session, exam_time, exam_room, course, major_code, exam_type,
                exam_link, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            "#,
            params![
                id,
                record.student_id,
                record.full_name,
                record.username,
                record.dob,
                record.exam_date,
                record.subject,
                record.exam_session,
                record.exam_time,
                record.exam_room,
                record.course,
                record.major_code,
                record.exam_type,
                record.exam_link,
                now,
            ],
        )?;
        debug!(record_id = %id, "记录已创建");
        Ok(record)
    }

    #[instrument(skip(self, patch), fields(fields = ?patch.field_names()))]
    async fn update(&self, id: &str, patch: &FieldPatch) -> RepositoryResult<()> {
        let conn = Self::lock(&self.conn)?;
        let affected = conn.execute(
            r#"
            UPDATE exam_record
            SET exam_date = COALESCE(?2, exam_date),
                exam_link = COALESCE(?3, exam_link),
                updated_at = ?4
            WHERE id = ?1
            "#,
            params![id, patch.exam_date, patch.exam_link, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found(ENTITY, id));
        }
        Ok(())
    }
}

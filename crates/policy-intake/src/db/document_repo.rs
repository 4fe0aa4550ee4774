//! Document repository: CRUD for the `documents` table and the conditional
//! status write every pipeline stage goes through.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::document::{
    Document, DocumentKey, DocumentStatus, FieldConfidence, FieldName, PolicyFields,
};

use super::{Database, DatabaseError};

/// Result of a conditional status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The document was no longer in an expected status; another invocation
    /// got there first.
    AlreadyAdvanced,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LastError {
    #[default]
    Keep,
    Set(String),
    Clear,
}

/// Extracted values written together with a status change.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub fields: PolicyFields,
    /// `None` keeps the stored confidences.
    pub confidence: Option<FieldConfidence>,
    pub needs_review: Vec<FieldName>,
    /// `None` keeps the stored version marker.
    pub extraction_version: Option<u32>,
}

/// Everything a single conditional write changes besides the status.
#[derive(Debug, Clone)]
pub struct StatusChange {
    to: DocumentStatus,
    at: DateTime<Utc>,
    last_error: LastError,
    increment_retry: bool,
    analysis_job: Option<(String, String)>,
    processing_started: bool,
    processing_ended: bool,
    fields: Option<FieldWrite>,
    verified_by: Option<String>,
}

impl StatusChange {
    pub fn to(status: DocumentStatus, at: DateTime<Utc>) -> Self {
        Self {
            to: status,
            at,
            last_error: LastError::Keep,
            increment_retry: false,
            analysis_job: None,
            processing_started: false,
            processing_ended: false,
            fields: None,
            verified_by: None,
        }
    }

    pub fn target(&self) -> DocumentStatus {
        self.to
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = LastError::Set(message.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = LastError::Clear;
        self
    }

    pub fn increment_retry(mut self) -> Self {
        self.increment_retry = true;
        self
    }

    pub fn with_analysis_job(
        mut self,
        job_id: impl Into<String>,
        result_key: impl Into<String>,
    ) -> Self {
        self.analysis_job = Some((job_id.into(), result_key.into()));
        self
    }

    pub fn processing_started(mut self) -> Self {
        self.processing_started = true;
        self
    }

    pub fn processing_ended(mut self) -> Self {
        self.processing_ended = true;
        self
    }

    pub fn with_fields(mut self, write: FieldWrite) -> Self {
        self.fields = Some(write);
        self
    }

    pub fn verified_by(mut self, user_id: impl Into<String>) -> Self {
        self.verified_by = Some(user_id.into());
        self
    }
}

/// Query filter for document listing.
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub tenant_id: Option<String>,
    pub owner_id: Option<String>,
    pub statuses: Vec<DocumentStatus>,
    /// `None` returns every matching row.
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Accumulates `column = ?n` clauses with their bound values.
#[derive(Default)]
struct SqlParams {
    clauses: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl SqlParams {
    fn bind(&mut self, value: impl ToSql + 'static) -> usize {
        self.values.push(Box::new(value));
        self.values.len()
    }

    fn set(&mut self, column: &str, value: impl ToSql + 'static) {
        let idx = self.bind(value);
        self.clauses.push(format!("{} = ?{}", column, idx));
    }

    fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    fn refs(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|p| p.as_ref()).collect()
    }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode<T: serde::Serialize>(column: &'static str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|source| DatabaseError::Encode { column, source })
}

fn conversion_error(
    row: &Row<'_>,
    column: &str,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    let idx = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_time(row: &Row<'_>, column: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, column, e))
}

fn parse_time_opt(row: &Row<'_>, column: &str) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    match row.get::<_, Option<String>>(column)? {
        Some(_) => parse_time(row, column).map(Some),
        None => Ok(None),
    }
}

fn document_from_row(row: &Row<'_>) -> Result<Document, rusqlite::Error> {
    let status: String = row.get("status")?;
    let status = status
        .parse::<DocumentStatus>()
        .map_err(|e| conversion_error(row, "status", e))?;

    let raw_confidence: String = row.get("field_confidence")?;
    let by_name: BTreeMap<String, f64> = serde_json::from_str(&raw_confidence)
        .map_err(|e| conversion_error(row, "field_confidence", e))?;
    let mut field_confidence = FieldConfidence::new();
    for (name, score) in by_name {
        let field = name
            .parse::<FieldName>()
            .map_err(|e| conversion_error(row, "field_confidence", e))?;
        field_confidence.insert(field, score);
    }

    let raw_review: String = row.get("needs_review_fields")?;
    let needs_review_fields: Vec<FieldName> = serde_json::from_str(&raw_review)
        .map_err(|e| conversion_error(row, "needs_review_fields", e))?;

    Ok(Document {
        tenant_id: row.get("tenant_id")?,
        document_id: row.get("document_id")?,
        owner_id: row.get("owner_id")?,
        status,
        source_object_key: row.get("source_object_key")?,
        content_type: row.get("content_type")?,
        size_bytes: row.get::<_, i64>("size_bytes")?.max(0) as u64,
        file_name: row.get("file_name")?,
        analysis_job_id: row.get("analysis_job_id")?,
        analysis_result_key: row.get("analysis_result_key")?,
        retry_count: row.get("retry_count")?,
        last_error: row.get("last_error")?,
        fields: PolicyFields {
            policy_number: row.get("policy_number")?,
            insured_name: row.get("insured_name")?,
            policy_type: row.get("policy_type")?,
            insurer: row.get("insurer")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            premium_total: row.get("premium_total")?,
            currency: row.get("currency")?,
            renewal_date: row.get("renewal_date")?,
        },
        field_confidence,
        needs_review_fields,
        extraction_version: row.get("extraction_version")?,
        created_at: parse_time(row, "created_at")?,
        updated_at: parse_time(row, "updated_at")?,
        processing_started_at: parse_time_opt(row, "processing_started_at")?,
        processing_ended_at: parse_time_opt(row, "processing_ended_at")?,
        verified_at: parse_time_opt(row, "verified_at")?,
        verified_by_user_id: row.get("verified_by_user_id")?,
    })
}

/// Inserts a new document row.
pub fn insert(db: &Database, doc: &Document) -> Result<(), DatabaseError> {
    let confidence = encode("field_confidence", &doc.field_confidence)?;
    let review = encode("needs_review_fields", &doc.needs_review_fields)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (tenant_id, document_id, owner_id, status, source_object_key,
             content_type, size_bytes, file_name, analysis_job_id, analysis_result_key,
             retry_count, last_error, policy_number, insured_name, policy_type, insurer,
             start_date, end_date, premium_total, currency, renewal_date, field_confidence,
             needs_review_fields, extraction_version, created_at, updated_at,
             processing_started_at, processing_ended_at, verified_at, verified_by_user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
            params![
                doc.tenant_id,
                doc.document_id,
                doc.owner_id,
                doc.status.as_str(),
                doc.source_object_key,
                doc.content_type,
                doc.size_bytes as i64,
                doc.file_name,
                doc.analysis_job_id,
                doc.analysis_result_key,
                doc.retry_count,
                doc.last_error,
                doc.fields.policy_number,
                doc.fields.insured_name,
                doc.fields.policy_type,
                doc.fields.insurer,
                doc.fields.start_date,
                doc.fields.end_date,
                doc.fields.premium_total,
                doc.fields.currency,
                doc.fields.renewal_date,
                confidence,
                review,
                doc.extraction_version,
                timestamp(doc.created_at),
                timestamp(doc.updated_at),
                doc.processing_started_at.map(timestamp),
                doc.processing_ended_at.map(timestamp),
                doc.verified_at.map(timestamp),
                doc.verified_by_user_id,
            ],
        )?;
        Ok(())
    })
}

/// Finds a document by its key.
pub fn find(db: &Database, key: &DocumentKey) -> Result<Option<Document>, DatabaseError> {
    db.with_conn(|conn| {
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE tenant_id = ?1 AND document_id = ?2",
                params![key.tenant_id, key.document_id],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    })
}

fn exists(conn: &Connection, key: &DocumentKey) -> Result<bool, DatabaseError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM documents WHERE tenant_id = ?1 AND document_id = ?2",
            params![key.tenant_id, key.document_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Applies `change` only if the document's current status is one of
/// `expected`.
///
/// Returns `AlreadyAdvanced` when the precondition does not hold. Asking for
/// a write that is not an edge of the lifecycle graph from every expected
/// status is rejected before touching the store.
pub fn transition(
    db: &Database,
    key: &DocumentKey,
    expected: &[DocumentStatus],
    change: &StatusChange,
) -> Result<WriteOutcome, DatabaseError> {
    if let Some(from) = expected.iter().find(|s| !s.can_transition_to(change.to)) {
        return Err(DatabaseError::IllegalTransition {
            from: *from,
            to: change.to,
        });
    }

    let mut update = SqlParams::default();
    update.set("status", change.to.as_str());
    update.set("updated_at", timestamp(change.at));

    match &change.last_error {
        LastError::Keep => {}
        LastError::Set(message) => update.set("last_error", message.clone()),
        LastError::Clear => update.raw("last_error = NULL"),
    }
    if change.increment_retry {
        update.raw("retry_count = retry_count + 1");
    }
    if let Some((job_id, result_key)) = &change.analysis_job {
        update.set("analysis_job_id", job_id.clone());
        update.set("analysis_result_key", result_key.clone());
    }
    if change.processing_started {
        update.set("processing_started_at", timestamp(change.at));
    }
    if change.processing_ended {
        update.set("processing_ended_at", timestamp(change.at));
    }
    if let Some(write) = &change.fields {
        let f = &write.fields;
        update.set("policy_number", f.policy_number.clone());
        update.set("insured_name", f.insured_name.clone());
        update.set("policy_type", f.policy_type.clone());
        update.set("insurer", f.insurer.clone());
        update.set("start_date", f.start_date.clone());
        update.set("end_date", f.end_date.clone());
        update.set("premium_total", f.premium_total);
        update.set("currency", f.currency.clone());
        update.set("renewal_date", f.renewal_date.clone());
        if let Some(confidence) = &write.confidence {
            update.set("field_confidence", encode("field_confidence", confidence)?);
        }
        update.set(
            "needs_review_fields",
            encode("needs_review_fields", &write.needs_review)?,
        );
        if let Some(version) = write.extraction_version {
            update.set("extraction_version", version);
        }
    }
    if let Some(reviewer) = &change.verified_by {
        update.set("verified_by_user_id", reviewer.clone());
        update.set("verified_at", timestamp(change.at));
    }

    let set_clause = update.clauses.join(", ");
    let tenant_idx = update.bind(key.tenant_id.clone());
    let document_idx = update.bind(key.document_id.clone());
    let placeholders: Vec<String> = expected
        .iter()
        .map(|s| format!("?{}", update.bind(s.as_str())))
        .collect();

    let sql = format!(
        "UPDATE documents SET {} WHERE tenant_id = ?{} AND document_id = ?{} AND status IN ({})",
        set_clause,
        tenant_idx,
        document_idx,
        placeholders.join(", ")
    );

    db.with_conn(|conn| {
        let changed = conn.execute(&sql, update.refs().as_slice())?;
        if changed > 0 {
            return Ok(WriteOutcome::Applied);
        }
        if exists(conn, key)? {
            Ok(WriteOutcome::AlreadyAdvanced)
        } else {
            Err(DatabaseError::NotFound(key.to_string()))
        }
    })
}

/// Queries documents, newest first, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &DocumentFilter,
) -> Result<(Vec<Document>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = SqlParams::default();

        if let Some(ref tenant_id) = filter.tenant_id {
            conditions.set("tenant_id", tenant_id.clone());
        }
        if let Some(ref owner_id) = filter.owner_id {
            conditions.set("owner_id", owner_id.clone());
        }
        if !filter.statuses.is_empty() {
            let placeholders: Vec<String> = filter
                .statuses
                .iter()
                .map(|s| format!("?{}", conditions.bind(s.as_str())))
                .collect();
            conditions.raw(&format!("status IN ({})", placeholders.join(", ")));
        }

        let where_clause = if conditions.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM documents {}", where_clause);
        let total: u64 =
            conn.query_row(&count_sql, conditions.refs().as_slice(), |r| r.get(0))?;

        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter.limit.map(|l| l.min(i64::MAX as u64) as i64).unwrap_or(-1);
        let offset = filter.offset.unwrap_or(0).min(i64::MAX as u64) as i64;
        let limit_idx = conditions.bind(limit);
        let offset_idx = conditions.bind(offset);
        let query_sql = format!(
            "SELECT * FROM documents {} ORDER BY created_at DESC, document_id LIMIT ?{} OFFSET ?{}",
            where_clause, limit_idx, offset_idx
        );

        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Document> = stmt
            .query_map(conditions.refs().as_slice(), document_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Deletes a document row. Returns whether a row was removed.
pub fn delete(db: &Database, key: &DocumentKey) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM documents WHERE tenant_id = ?1 AND document_id = ?2",
            params![key.tenant_id, key.document_id],
        )?;
        Ok(removed > 0)
    })
}

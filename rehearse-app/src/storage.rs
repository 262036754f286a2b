//! Local interview history: SQLite with transcript and report columns
//! encrypted at rest (AES-256-GCM, per-install derived key).

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::RngCore;
use rehearse_core::{FeedbackReport, Language, TranscriptTurn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encryption failed")]
    Crypto,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One row of the history listing (no transcript body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub created_at: String,
    pub language: Language,
    pub job_label: String,
    pub turn_count: usize,
    pub overall_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// A stored interview with its decrypted transcript and report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewRecord {
    #[serde(flatten)]
    pub summary: HistoryItem,
    pub turns: Vec<TranscriptTurn>,
    pub report: Option<FeedbackReport>,
}

#[derive(Debug, Clone)]
pub struct InterviewRecordInput {
    pub language: Language,
    pub job_label: String,
    pub turns: Vec<TranscriptTurn>,
    pub report: Option<FeedbackReport>,
}

#[derive(Debug, Clone)]
pub struct InterviewStore {
    db_path: PathBuf,
    cipher: TextCipher,
}

#[derive(Clone)]
struct TextCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TextCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TextCipher(..)")
    }
}

impl TextCipher {
    fn new(scope: &Path) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_default();
        let material = format!("{user}|{host}|{}|rehearse-history-v1", scope.to_string_lossy());
        let digest = Sha256::digest(material.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    fn encrypt(&self, plain: &str) -> StoreResult<String> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| StoreError::Crypto)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plain.as_bytes())
            .map_err(|_| StoreError::Crypto)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(BASE64.encode(out))
    }

    /// `None` when the value was written under a different key or is corrupt.
    fn decrypt(&self, encoded: &str) -> Option<String> {
        if encoded.is_empty() {
            return Some(String::new());
        }
        let bytes = BASE64.decode(encoded).ok()?;
        if bytes.len() <= NONCE_LEN {
            return None;
        }
        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
        let plain = cipher.decrypt(Nonce::from_slice(nonce_bytes), sealed).ok()?;
        String::from_utf8(plain).ok()
    }
}

impl InterviewStore {
    pub fn default_db_path() -> PathBuf {
        crate::settings::app_data_dir().join("rehearse.db")
    }

    pub fn new(db_path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            cipher: TextCipher::new(&db_path),
            db_path,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> StoreResult<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS interview_history (
              id TEXT PRIMARY KEY,
              created_at INTEGER NOT NULL,
              language TEXT NOT NULL,
              job_label TEXT NOT NULL DEFAULT '',
              turn_count INTEGER NOT NULL DEFAULT 0,
              overall_score REAL,
              transcript_enc TEXT NOT NULL,
              report_enc TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_interview_created_at ON interview_history(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn insert_interview(&self, input: InterviewRecordInput) -> StoreResult<String> {
        let id = new_id("iv");
        let transcript_enc = self.cipher.encrypt(&serde_json::to_string(&input.turns)?)?;
        let report_enc = match &input.report {
            Some(report) => self.cipher.encrypt(&serde_json::to_string(report)?)?,
            None => String::new(),
        };
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO interview_history
            (id, created_at, language, job_label, turn_count, overall_score, transcript_enc, report_enc)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                Utc::now().timestamp(),
                input.language.code(),
                input.job_label.trim(),
                input.turns.len() as i64,
                input.report.as_ref().map(|r| r.overall_score),
                transcript_enc,
                report_enc,
            ],
        )?;
        debug!(%id, turns = input.turns.len(), "interview stored");
        Ok(id)
    }

    /// Newest first. `query` matches the job label, case-insensitively.
    pub fn get_history(
        &self,
        page: usize,
        page_size: usize,
        query: Option<&str>,
    ) -> StoreResult<HistoryPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let query = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, language, job_label, turn_count, overall_score
             FROM interview_history ORDER BY created_at DESC, rowid DESC LIMIT 5000",
        )?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let job_label: String = row.get(3)?;
            if let Some(q) = &query {
                if !job_label.to_lowercase().contains(q) {
                    continue;
                }
            }
            items.push(HistoryItem {
                id: row.get(0)?,
                created_at: ts_to_rfc3339(row.get(1)?),
                language: parse_language(&row.get::<_, String>(2)?),
                job_label,
                turn_count: row.get::<_, i64>(4)?.max(0) as usize,
                overall_score: row.get(5)?,
            });
        }

        let total = items.len();
        let start = (page - 1).saturating_mul(page_size).min(total);
        let end = (start + page_size).min(total);
        Ok(HistoryPage {
            items: items[start..end].to_vec(),
            total,
            page,
            page_size,
        })
    }

    pub fn get_interview(&self, id: &str) -> StoreResult<Option<InterviewRecord>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, created_at, language, job_label, turn_count, overall_score, transcript_enc, report_enc
                 FROM interview_history WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        HistoryItem {
                            id: row.get(0)?,
                            created_at: ts_to_rfc3339(row.get(1)?),
                            language: parse_language(&row.get::<_, String>(2)?),
                            job_label: row.get(3)?,
                            turn_count: row.get::<_, i64>(4)?.max(0) as usize,
                            overall_score: row.get(5)?,
                        },
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((summary, transcript_enc, report_enc)) = row else {
            return Ok(None);
        };

        let Some(transcript_json) = self.cipher.decrypt(&transcript_enc) else {
            warn!(%id, "stored transcript could not be decrypted");
            return Ok(None);
        };
        let turns = serde_json::from_str(&transcript_json)?;
        let report = match self.cipher.decrypt(&report_enc) {
            Some(json) if !json.is_empty() => Some(serde_json::from_str(&json)?),
            _ => None,
        };
        Ok(Some(InterviewRecord {
            summary,
            turns,
            report,
        }))
    }

    pub fn delete_history(
        &self,
        ids: &[String],
        older_than_days: Option<usize>,
    ) -> StoreResult<usize> {
        let conn = self.open()?;
        let mut deleted = 0usize;
        for id in ids {
            deleted += conn.execute("DELETE FROM interview_history WHERE id = ?1", params![id])?;
        }
        if let Some(days) = older_than_days {
            deleted += delete_before(&conn, Utc::now() - Duration::days(days as i64))?;
        }
        Ok(deleted)
    }

    pub fn prune_history(&self, retention_days: usize) -> StoreResult<usize> {
        if retention_days == 0 {
            return Ok(0);
        }
        let conn = self.open()?;
        delete_before(&conn, Utc::now() - Duration::days(retention_days as i64))
    }
}

fn delete_before(conn: &Connection, cutoff: DateTime<Utc>) -> StoreResult<usize> {
    Ok(conn.execute(
        "DELETE FROM interview_history WHERE created_at < ?1",
        params![cutoff.timestamp()],
    )?)
}

fn parse_language(code: &str) -> Language {
    code.parse().unwrap_or_default()
}

fn ts_to_rfc3339(ts: i64) -> String {
    let dt: DateTime<Utc> = Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);
    dt.to_rfc3339()
}

fn new_id(prefix: &str) -> String {
    format!(
        "{prefix}-{}-{:08x}",
        Utc::now().timestamp_micros(),
        rand::random::<u32>()
    )
}

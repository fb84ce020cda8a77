//! SQLite-backed task store.
//!
//! Every mutating call commits before returning, so any effect observed by
//! a caller survives a crash. Ownership is a column, not process state:
//! `claim` stamps the worker inside an immediate transaction, which makes
//! at-most-one-owner hold even with concurrent claimers or a second
//! process on the same database.

use crate::error::{Result, ScribeError};
use crate::store::task::{
    ChunkRecord, ChunkStatus, PipelineResult, SubmitOptions, Task, TaskSnapshot, TaskStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id               TEXT PRIMARY KEY,
    owner            TEXT NOT NULL,
    audio_ref        TEXT NOT NULL,
    status           TEXT NOT NULL,
    attempts         INTEGER NOT NULL DEFAULT 0,
    worker           TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    options          TEXT NOT NULL,
    stage_data       TEXT,
    result           TEXT,
    error            TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at);

CREATE TABLE IF NOT EXISTS chunks (
    task_id         TEXT NOT NULL REFERENCES tasks(id),
    seq             INTEGER NOT NULL,
    start_sample    INTEGER NOT NULL,
    sample_len      INTEGER NOT NULL,
    overlap_samples INTEGER NOT NULL,
    status          TEXT NOT NULL,
    transcript      TEXT,
    confidence      REAL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (task_id, seq)
);
";

/// Counts served by `queue_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

/// Durable record of every submitted job and its lifecycle state.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL keeps readers unblocked while workers checkpoint.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests; nothing survives the process).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ScribeError::Store {
            message: "task store mutex poisoned".to_string(),
        })
    }

    /// Add a new task to the queue.
    ///
    /// The audio reference must point at a readable file and the options
    /// must be coherent; both are rejected here, at submission, rather
    /// than surfacing later inside a worker.
    pub fn enqueue(&self, owner: &str, audio_ref: &str, options: &SubmitOptions) -> Result<String> {
        if options.chunk_duration_secs == 0 {
            return Err(ScribeError::Config {
                key: "chunk_duration_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if options.overlap_secs >= options.chunk_duration_secs {
            return Err(ScribeError::Config {
                key: "overlap_secs".to_string(),
                message: "overlap must be shorter than chunk duration".to_string(),
            });
        }
        std::fs::metadata(audio_ref).map_err(|e| ScribeError::Input {
            message: format!("audio reference {audio_ref} is unreadable: {e}"),
        })?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let options_json = serde_json::to_string(options).map_err(|e| ScribeError::Store {
            message: format!("failed to encode options: {e}"),
        })?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, owner, audio_ref, status, options, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, owner, audio_ref, TaskStatus::Queued.as_str(), options_json, now],
        )?;

        tracing::info!(task_id = %id, owner, "task enqueued");
        Ok(id)
    }

    /// Atomically take ownership of the oldest queued task.
    ///
    /// Returns `None` when the queue is empty. The selected task moves to
    /// `analyzing` with the caller stamped as owner inside one immediate
    /// transaction; no two callers can ever receive the same task.
    pub fn claim(&self, worker: &str) -> Result<Option<Task>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM tasks WHERE status = 'queued' ORDER BY created_at, id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            tx.commit()?;
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        let updated = tx.execute(
            "UPDATE tasks SET status = 'analyzing', worker = ?1, attempts = attempts + 1,
             updated_at = ?2 WHERE id = ?3 AND status = 'queued'",
            params![worker, now, id],
        )?;
        if updated != 1 {
            tx.commit()?;
            return Ok(None);
        }

        let task = Self::read_task(&tx, &id)?;
        tx.commit()?;

        tracing::info!(task_id = %id, worker, "task claimed");
        Ok(Some(task))
    }

    /// Idempotent checkpoint write for a stage transition.
    ///
    /// Re-writing the current status with the same payload is a no-op;
    /// moving backward along the state machine is a store error, which
    /// catches ordering bugs instead of silently corrupting state.
    pub fn persist_stage(
        &self,
        task_id: &str,
        status: TaskStatus,
        stage_data: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let current = Self::read_status(&conn, task_id)?;

        if current == status {
            // Idempotent replay of the same checkpoint.
        } else if !current.can_transition_to(status) {
            return Err(ScribeError::Store {
                message: format!(
                    "illegal transition {current} -> {status} for task {task_id}"
                ),
            });
        }

        let data_json = stage_data.map(serde_json::Value::to_string);
        conn.execute(
            "UPDATE tasks SET status = ?1, stage_data = COALESCE(?2, stage_data),
             updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), data_json, Utc::now().to_rfc3339(), task_id],
        )?;
        Ok(())
    }

    /// Mark a task done with its final result, releasing ownership.
    pub fn complete(&self, task_id: &str, result: &PipelineResult) -> Result<()> {
        self.finish(task_id, TaskStatus::Done, Some(result), None)
    }

    /// Mark a task failed with a diagnostic and any partial result.
    pub fn fail(
        &self,
        task_id: &str,
        error: &str,
        partial: Option<&PipelineResult>,
    ) -> Result<()> {
        self.finish(task_id, TaskStatus::Failed, partial, Some(error))
    }

    fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&PipelineResult>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let current = Self::read_status(&conn, task_id)?;
        if !current.can_transition_to(status) && current != status {
            return Err(ScribeError::Store {
                message: format!("illegal transition {current} -> {status} for task {task_id}"),
            });
        }

        let result_json = result
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ScribeError::Store {
                message: format!("failed to encode result: {e}"),
            })?;

        conn.execute(
            "UPDATE tasks SET status = ?1, result = COALESCE(?2, result), error = ?3,
             worker = NULL, updated_at = ?4 WHERE id = ?5",
            params![
                status.as_str(),
                result_json,
                error,
                Utc::now().to_rfc3339(),
                task_id
            ],
        )?;
        Ok(())
    }

    /// Request cancellation of a task.
    ///
    /// A queued task is cancelled on the spot. A task owned by a worker
    /// gets its flag set; the worker observes it at the next stage
    /// boundary or chunk dispatch and transitions the task itself.
    /// Terminal tasks are left untouched.
    pub fn request_cancel(&self, task_id: &str) -> Result<TaskStatus> {
        let conn = self.lock()?;
        let current = Self::read_status(&conn, task_id)?;
        let now = Utc::now().to_rfc3339();

        match current {
            TaskStatus::Queued => {
                conn.execute(
                    "UPDATE tasks SET status = 'cancelled', cancel_requested = 1,
                     worker = NULL, updated_at = ?1 WHERE id = ?2",
                    params![now, task_id],
                )?;
                tracing::info!(task_id, "queued task cancelled");
                Ok(TaskStatus::Cancelled)
            }
            s if s.is_terminal() => Ok(s),
            _ => {
                conn.execute(
                    "UPDATE tasks SET cancel_requested = 1, updated_at = ?1 WHERE id = ?2",
                    params![now, task_id],
                )?;
                tracing::info!(task_id, "cancellation requested");
                Ok(current)
            }
        }
    }

    /// Whether cancellation has been requested for a task.
    pub fn cancel_requested(&self, task_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let flag: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match flag {
            Some(v) => Ok(v != 0),
            None => Err(ScribeError::NotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Apply a cancellation: terminal transition plus ownership release.
    /// Chunks abandoned mid-dispatch drop back to `pending` so the task
    /// carries no dangling in-flight state.
    pub fn mark_cancelled(&self, task_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE tasks SET status = 'cancelled', worker = NULL, updated_at = ?1
             WHERE id = ?2 AND status NOT IN ('done', 'failed')",
            params![Utc::now().to_rfc3339(), task_id],
        )?;
        if updated > 0 {
            tx.execute(
                "UPDATE chunks SET status = 'pending'
                 WHERE task_id = ?1 AND status = 'in_flight'",
                params![task_id],
            )?;
        }
        tx.commit()?;
        tracing::info!(task_id, "task cancelled");
        Ok(())
    }

    /// Replace the chunk plan for a task.
    ///
    /// Called exactly once per pipeline run, at the end of the chunking
    /// stage. A re-run after crash recovery replaces the previous plan
    /// atomically; once the task moves past `chunking` the set is never
    /// touched again.
    pub fn insert_chunks(&self, task_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE task_id = ?1", params![task_id])?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (task_id, seq, start_sample, sample_len, overlap_samples,
                 status, transcript, confidence, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task_id,
                    chunk.seq,
                    chunk.start_sample as i64,
                    chunk.sample_len as i64,
                    chunk.overlap_samples as i64,
                    chunk.status.as_str(),
                    chunk.transcript,
                    chunk.confidence,
                    chunk.attempts
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Move a chunk to `in_flight` before dispatching it to the engine.
    pub fn mark_chunk_in_flight(&self, task_id: &str, seq: u32) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chunks SET status = 'in_flight', attempts = attempts + 1
             WHERE task_id = ?1 AND seq = ?2",
            params![task_id, seq],
        )?;
        Ok(())
    }

    /// Record a chunk's terminal outcome.
    pub fn finish_chunk(
        &self,
        task_id: &str,
        seq: u32,
        status: ChunkStatus,
        transcript: Option<&str>,
        confidence: Option<f32>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chunks SET status = ?1, transcript = ?2, confidence = ?3
             WHERE task_id = ?4 AND seq = ?5",
            params![status.as_str(), transcript, confidence, task_id, seq],
        )?;
        Ok(())
    }

    /// All chunks for a task, ordered by sequence index.
    pub fn chunks_for_task(&self, task_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, seq, start_sample, sample_len, overlap_samples, status,
             transcript, confidence, attempts FROM chunks WHERE task_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            let status_str: String = row.get(5)?;
            Ok(ChunkRecord {
                task_id: row.get(0)?,
                seq: row.get(1)?,
                start_sample: row.get::<_, i64>(2)? as u64,
                sample_len: row.get::<_, i64>(3)? as u64,
                overlap_samples: row.get::<_, i64>(4)? as u64,
                status: status_str.parse().unwrap_or(ChunkStatus::Pending),
                transcript: row.get(6)?,
                confidence: row.get(7)?,
                attempts: row.get(8)?,
            })
        })?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// Re-queue tasks left owned-but-not-terminal by a previous crash.
    ///
    /// Runs once at dispatcher startup, before the first claim. In-flight
    /// chunks of recovered tasks drop back to `pending`; completed chunk
    /// transcripts are kept but the pipeline re-runs from the top, which
    /// rebuilds the chunk plan deterministically.
    pub fn recover_orphaned(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE chunks SET status = 'pending' WHERE status = 'in_flight'
             AND task_id IN (SELECT id FROM tasks WHERE worker IS NOT NULL
                             AND status NOT IN ('done', 'failed', 'cancelled'))",
            [],
        )?;
        let recovered = tx.execute(
            "UPDATE tasks SET status = 'queued', worker = NULL, updated_at = ?1
             WHERE worker IS NOT NULL AND status NOT IN ('done', 'failed', 'cancelled')",
            params![now],
        )?;
        tx.commit()?;

        if recovered > 0 {
            tracing::info!(count = recovered, "recovered interrupted tasks");
        }
        Ok(recovered)
    }

    /// Fetch a task by id.
    pub fn get(&self, task_id: &str) -> Result<Task> {
        let conn = self.lock()?;
        Self::read_task(&conn, task_id)
    }

    /// Externally visible state: status, progress, partial availability.
    pub fn snapshot(&self, task_id: &str) -> Result<TaskSnapshot> {
        let conn = self.lock()?;
        let task = Self::read_task(&conn, task_id)?;

        let (chunks_total, chunks_done): (u32, u32) = conn.query_row(
            "SELECT COUNT(*), COUNT(CASE WHEN status IN ('done', 'failed') THEN 1 END)
             FROM chunks WHERE task_id = ?1",
            params![task_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let any_transcribed: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chunks WHERE task_id = ?1 AND status = 'done')",
            params![task_id],
            |row| row.get(0),
        )?;

        let progress = match task.status {
            TaskStatus::Transcribing if chunks_total > 0 => {
                let span = TaskStatus::Assembling.base_progress()
                    - TaskStatus::Transcribing.base_progress();
                TaskStatus::Transcribing.base_progress()
                    + span * (chunks_done as f32 / chunks_total as f32)
            }
            s => s.base_progress(),
        };

        Ok(TaskSnapshot {
            task_id: task.id,
            status: task.status,
            progress,
            partial_result_available: task.result.is_some() || any_transcribed,
            error: task.error,
        })
    }

    /// Final pipeline result for a terminal task.
    ///
    /// `done` and `failed` tasks carry a result payload (possibly partial);
    /// anything else is not ready yet. Cancelled tasks never become ready.
    pub fn result(&self, task_id: &str) -> Result<PipelineResult> {
        let conn = self.lock()?;
        let task = Self::read_task(&conn, task_id)?;
        match task.result {
            Some(result) if matches!(task.status, TaskStatus::Done | TaskStatus::Failed) => {
                Ok(result)
            }
            _ => Err(ScribeError::NotReady {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Queue occupancy counters.
    pub fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            match status.as_str() {
                "queued" => stats.queued += count,
                "done" => stats.done += count,
                "failed" => stats.failed += count,
                "cancelled" => stats.cancelled += count,
                _ => stats.active += count,
            }
        }
        Ok(stats)
    }

    /// Snapshots of every task submitted by one owner, newest first.
    pub fn tasks_for_owner(&self, owner: &str) -> Result<Vec<TaskSnapshot>> {
        let ids: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT id FROM tasks WHERE owner = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![owner], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        ids.iter().map(|id| self.snapshot(id)).collect()
    }

    fn read_status(conn: &Connection, task_id: &str) -> Result<TaskStatus> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            Some(s) => s.parse().map_err(|e: String| ScribeError::Store { message: e }),
            None => Err(ScribeError::NotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    fn read_task(conn: &Connection, task_id: &str) -> Result<Task> {
        let task = conn
            .query_row(
                "SELECT id, owner, audio_ref, status, attempts, worker, cancel_requested,
                 options, stage_data, result, error, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    let status_str: String = row.get(3)?;
                    let options_json: String = row.get(7)?;
                    let stage_data_json: Option<String> = row.get(8)?;
                    let result_json: Option<String> = row.get(9)?;
                    let created_at: String = row.get(11)?;
                    let updated_at: String = row.get(12)?;
                    Ok(Task {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        audio_ref: row.get(2)?,
                        status: status_str.parse().unwrap_or(TaskStatus::Failed),
                        attempts: row.get(4)?,
                        worker: row.get(5)?,
                        cancel_requested: row.get::<_, i64>(6)? != 0,
                        options: serde_json::from_str(&options_json).unwrap_or_default(),
                        stage_data: stage_data_json.and_then(|s| serde_json::from_str(&s).ok()),
                        result: result_json.and_then(|s| serde_json::from_str(&s).ok()),
                        error: row.get(10)?,
                        created_at: parse_timestamp(&created_at),
                        updated_at: parse_timestamp(&updated_at),
                    })
                },
            )
            .optional()?;
        task.ok_or_else(|| ScribeError::NotFound {
            task_id: task_id.to_string(),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

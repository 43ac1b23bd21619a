use crate::types::SimDay;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The machine or location for a context build could not be resolved.
    /// Fatal for that machine's day only — the batch continues.
    #[error("Data unavailable: {entity} {id} not found")]
    DataUnavailable { entity: &'static str, id: i64 },

    #[error(
        "Out-of-order inventory advance for machine {machine_id}: expected {expected}, got {got}"
    )]
    OutOfOrderAdvance {
        machine_id: i64,
        expected: SimDay,
        got: SimDay,
    },

    #[error("Already at end of simulation window ({end_day})")]
    AtEndOfWindow { end_day: SimDay },

    #[error("Date {date} outside simulation window [{start_day}, {end_day}]")]
    DateOutOfWindow {
        date: SimDay,
        start_day: SimDay,
        end_day: SimDay,
    },

    #[error("Another clock operation is already in progress")]
    ConflictingOperation,

    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Unknown alert: {0}")]
    UnknownAlert(String),

    #[error("Revision {revision_id} not found for script {script_name}")]
    UnknownRevision {
        script_name: String,
        revision_id: String,
    },

    #[error("Script '{script_name}' rejected: {message}")]
    ScriptRejected {
        script_name: String,
        message: String,
    },

    #[error("Comparison failed on day {day} machine {machine_id}: {message}")]
    CompareFailed {
        day: SimDay,
        machine_id: i64,
        message: String,
    },

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

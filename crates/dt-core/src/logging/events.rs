//! Event vocabulary: levels, pipeline stages, stable event names and the
//! correlation context carried by every line.

use dt_common::AnalysisId;
use serde::{Deserialize, Serialize};

/// Log level as it appears in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Assemble,
    Decompose,
    RankScan,
    Stability,
    Compare,
    Community,
    Store,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Assemble => "assemble",
            Stage::Decompose => "decompose",
            Stage::RankScan => "rank_scan",
            Stage::Stability => "stability",
            Stage::Compare => "compare",
            Stage::Community => "community",
            Stage::Store => "store",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable event names, used as the tracing target of each event.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";

    pub const ASSEMBLE_SKIPPED: &str = "assemble.skipped";
    pub const ASSEMBLE_COERCED: &str = "assemble.coerced";
    pub const ASSEMBLE_FINISHED: &str = "assemble.finished";

    pub const DECOMPOSE_STARTED: &str = "decompose.started";
    pub const DECOMPOSE_ITERATION: &str = "decompose.iteration";
    pub const DECOMPOSE_FINISHED: &str = "decompose.finished";
    pub const DECOMPOSE_RESTART_FAILED: &str = "decompose.restart_failed";

    pub const RANK_SCAN_RANK_DONE: &str = "rank_scan.rank_done";
    pub const RANK_SCAN_RANK_FAILED: &str = "rank_scan.rank_failed";
    pub const RANK_SCAN_NON_MONOTONIC: &str = "rank_scan.non_monotonic";

    pub const STABILITY_RUN_DONE: &str = "stability.run_done";
    pub const STABILITY_RUN_FAILED: &str = "stability.run_failed";
    pub const STABILITY_HIGH_VARIABILITY: &str = "stability.high_variability";

    pub const COMPARE_SHAPE_MISMATCH: &str = "compare.shape_mismatch";
    pub const COMPARE_VERDICT: &str = "compare.verdict";

    pub const COMMUNITY_TIME_LABELS_DROPPED: &str = "community.time_labels_dropped";

    pub const STORE_WRITTEN: &str = "store.written";
}

/// Correlation IDs shared by every event of one CLI invocation.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub analysis_id: AnalysisId,
    pub host_id: String,
}

impl LogContext {
    pub fn new(analysis_id: AnalysisId, host_id: impl Into<String>) -> Self {
        LogContext {
            analysis_id,
            host_id: host_id.into(),
        }
    }

    /// Span carrying the correlation IDs; events emitted inside it inherit them.
    pub fn span(&self, stage: Stage) -> tracing::Span {
        tracing::info_span!(
            "dt",
            analysis_id = %self.analysis_id,
            host_id = %self.host_id,
            stage = stage.as_str(),
        )
    }
}

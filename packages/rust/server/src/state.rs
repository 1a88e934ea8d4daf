use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rtools_core::ToolContext;
use rtools_shared::{RunId, RunSummary, Tool, ToolRun};
use serde::Serialize;

/// Runs kept for `/api/last-summaries`.
const MAX_RECENT_RUNS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub tool: Tool,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
}

/// The latest format and paste summaries plus a short run history,
/// newest first. Lives for the process only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LastSummaries {
    pub format: Option<RunSummary>,
    pub paste: Option<RunSummary>,
    pub runs: VecDeque<RunRecord>,
}

impl LastSummaries {
    pub fn record(&mut self, run: &ToolRun) {
        match run.tool {
            Tool::Format => self.format = Some(run.summary.clone()),
            Tool::Paste => self.paste = Some(run.summary.clone()),
            _ => {}
        }
        self.runs.push_front(RunRecord {
            run_id: run.run_id,
            tool: run.tool,
            finished_at: run.finished_at,
            summary: run.summary.clone(),
        });
        self.runs.truncate(MAX_RECENT_RUNS);
    }
}

/// Shared by every connection.
#[derive(Debug)]
pub struct AppState {
    pub ctx: ToolContext,
    summaries: Mutex<LastSummaries>,
}

impl AppState {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            summaries: Mutex::new(LastSummaries::default()),
        }
    }

    pub fn record(&self, run: &ToolRun) {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(run);
    }

    pub fn summaries(&self) -> LastSummaries {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

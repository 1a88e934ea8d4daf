use rtools_shared::ToolRun;

/// Progress callback for reporting tool status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the tool has finished.
    fn done(&self, run: &ToolRun);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _run: &ToolRun) {}
}

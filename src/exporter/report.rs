use std::collections::BTreeMap;

use serde::Serialize;

use super::entity::Stage;
use crate::traits::Output;

/// Step of the run a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    List,
    Read,
    Search,
    Import,
    Body,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::List => "list",
            Phase::Read => "read",
            Phase::Search => "search",
            Phase::Import => "import",
            Phase::Body => "body",
        };
        write!(f, "{}", s)
    }
}

/// A non-fatal failure scoped to one kind or entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: String,
    /// Remote ID, absent for kind-wide failures such as listing
    pub id: Option<String>,
    pub phase: Phase,
    pub message: String,
}

impl Failure {
    pub fn new(kind: &str, id: Option<&str>, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.map(str::to_string),
            phase,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}[{}] {}: {}", self.kind, id, self.phase, self.message),
            None => write!(f, "{} {}: {}", self.kind, self.phase, self.message),
        }
    }
}

/// Per-kind outcome counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindTally {
    pub emitted: usize,
    pub ignored: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Success and failure tally of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub tallies: BTreeMap<String, KindTally>,
    pub failures: Vec<Failure>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    /// Count the terminal stage of one entity
    pub fn count(&mut self, kind: &str, stage: Stage) {
        let tally = self.tallies.entry(kind.to_string()).or_default();
        match stage {
            Stage::Finalized => tally.emitted += 1,
            Stage::Ignored => tally.ignored += 1,
            Stage::Missing => tally.missing += 1,
            Stage::Failed => tally.failed += 1,
            Stage::Queued | Stage::Enriched => {}
        }
    }

    pub fn emitted(&self) -> usize {
        self.tallies.values().map(|t| t.emitted).sum()
    }

    /// Some kind or entity failed, but the run produced output
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Process exit status: 0 complete, 2 partial
    pub fn exit_code(&self) -> i32 {
        if self.is_partial() { 2 } else { 0 }
    }

    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }

    pub fn render(&self, output: &dyn Output) {
        output.section("Export summary");
        output.table_header(&["Kind", "Emitted", "Ignored", "Missing", "Failed"]);
        for (kind, tally) in &self.tallies {
            let emitted = tally.emitted.to_string();
            let ignored = tally.ignored.to_string();
            let missing = tally.missing.to_string();
            let failed = tally.failed.to_string();
            output.table_row(&[
                kind.as_str(),
                emitted.as_str(),
                ignored.as_str(),
                missing.as_str(),
                failed.as_str(),
            ]);
        }
        output.blank();

        if self.failures.is_empty() {
            output.success(&format!("Exported {} resources", self.emitted()));
            return;
        }

        for failure in &self.failures {
            output.error(&failure.to_string());
        }
        output.warning(&format!(
            "Exported {} resources with {} failures",
            self.emitted(),
            self.failures.len()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockOutput;

    #[test]
    fn test_exit_code_reflects_failures() {
        let mut report = Report::new();
        report.count("databricks_cluster", Stage::Finalized);
        assert_eq!(report.exit_code(), 0);

        report.record(Failure::new("databricks_job", None, Phase::List, "HTTP 503"));
        assert!(report.is_partial());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_tally_by_stage() {
        let mut report = Report::new();
        report.count("databricks_permissions", Stage::Finalized);
        report.count("databricks_permissions", Stage::Ignored);
        report.count("databricks_permissions", Stage::Ignored);
        report.count("databricks_cluster", Stage::Missing);

        let tally = &report.tallies["databricks_permissions"];
        assert_eq!(tally.emitted, 1);
        assert_eq!(tally.ignored, 2);
        assert_eq!(report.tallies["databricks_cluster"].missing, 1);
        assert_eq!(report.emitted(), 1);
    }

    #[test]
    fn test_render_lists_failures() {
        let mut report = Report::new();
        report.count("databricks_cluster", Stage::Finalized);
        report.record(Failure::new(
            "databricks_azure_adls_gen2_mount",
            Some("/mnt/lake"),
            Phase::Body,
            "no match",
        ));

        let output = MockOutput::new();
        report.render(&output);

        assert!(output.has_error());
        let text = output.to_text();
        assert!(text.contains("databricks_azure_adls_gen2_mount[/mnt/lake] body: no match"));
        assert!(text.contains("with 1 failures"));
    }
}

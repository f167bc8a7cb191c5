use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::error::{ExportError, ExportResult};
use crate::traits::FileSystem;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Selection inputs of one export run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Service tags to list; empty lists every service
    pub services: Vec<String>,
    /// Label filter applied by list hooks only
    #[serde(rename = "match")]
    pub name_match: String,
    /// Clusters inactive for longer than this are not listed
    pub last_active_days: i64,
    /// Elevated access; detected from the current identity when unset
    pub admin: Option<bool>,
    /// Discover mount points (requires listing the mount table)
    pub mounts: bool,
    /// Maximum number of kinds listed at the same time
    pub concurrency: usize,
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            name_match: String::new(),
            last_active_days: 3650,
            admin: None,
            mounts: false,
            concurrency: 4,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ExportConfig {
    /// Load a YAML config file
    pub fn load(fs: &dyn FileSystem, path: &Path) -> ExportResult<Self> {
        let content = fs.read_to_string(path).map_err(|e| {
            ExportError::InvalidConfig(format!("Cannot read config {}: {:#}", path.display(), e))
        })?;
        let config: ExportConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExportResult<()> {
        if self.last_active_days < 0 {
            return Err(ExportError::InvalidConfig(format!(
                "last_active_days must not be negative, got {}",
                self.last_active_days
            )));
        }
        if self.concurrency == 0 {
            return Err(ExportError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        NameFilter::new(&self.name_match)?;
        Ok(())
    }

    pub fn name_filter(&self) -> ExportResult<NameFilter> {
        NameFilter::new(&self.name_match)
    }

    /// Whether activity at `last_activity_ms` is older than the staleness window
    ///
    /// A zero timestamp means the object never ran and carries no age.
    pub fn is_stale(&self, last_activity_ms: i64, now_ms: i64) -> bool {
        if last_activity_ms <= 0 {
            return false;
        }
        let cutoff = now_ms.saturating_sub(self.last_active_days.saturating_mul(MS_PER_DAY));
        last_activity_ms < cutoff
    }
}

/// Label filter
///
/// Patterns with `*` or `?` are globs matched against the whole label;
/// anything else matches as a substring. Both ignore case.
#[derive(Debug, Clone)]
pub enum NameFilter {
    All,
    Substring(String),
    Glob(Regex),
}

impl NameFilter {
    pub fn new(pattern: &str) -> ExportResult<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(NameFilter::All);
        }
        if !pattern.contains(['*', '?']) {
            return Ok(NameFilter::Substring(pattern.to_lowercase()));
        }

        let mut translated = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(&other.to_string())),
            }
        }
        translated.push('$');

        let regex = RegexBuilder::new(&translated)
            .case_insensitive(true)
            .build()
            .map_err(|e| ExportError::InvalidConfig(format!("Invalid match pattern '{}': {}", pattern, e)))?;
        Ok(NameFilter::Glob(regex))
    }

    pub fn matches(&self, label: &str) -> bool {
        match self {
            NameFilter::All => true,
            NameFilter::Substring(needle) => label.to_lowercase().contains(needle),
            NameFilter::Glob(regex) => regex.is_match(label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockFileSystem;

    #[test]
    fn test_name_filter_substring() {
        let filter = NameFilter::new("ETL").unwrap();
        assert!(filter.matches("nightly-etl"));
        assert!(!filter.matches("reporting"));
    }

    #[test]
    fn test_name_filter_glob() {
        let filter = NameFilter::new("prod-*").unwrap();
        assert!(filter.matches("PROD-etl"));
        assert!(!filter.matches("dev-prod-etl"));

        let single = NameFilter::new("team?").unwrap();
        assert!(single.matches("team1"));
        assert!(!single.matches("team12"));

        let dotted = NameFilter::new("a.b*").unwrap();
        assert!(dotted.matches("a.bc"));
        assert!(!dotted.matches("axbc"));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(NameFilter::new("  ").unwrap().matches("anything"));
    }

    #[test]
    fn test_staleness_window() {
        let config = ExportConfig {
            last_active_days: 30,
            ..Default::default()
        };
        let now = 100 * MS_PER_DAY;

        assert!(config.is_stale(now - 31 * MS_PER_DAY, now));
        assert!(!config.is_stale(now - 29 * MS_PER_DAY, now));
        assert!(!config.is_stale(0, now));
    }

    #[test]
    fn test_load_from_yaml() {
        let fs = MockFileSystem::new();
        fs.write(
            Path::new("/cfg/export.yaml"),
            "services: [compute, jobs]\nmatch: etl\nmounts: true\nadmin: false\n",
        )
        .unwrap();

        let config = ExportConfig::load(&fs, Path::new("/cfg/export.yaml")).unwrap();
        assert_eq!(config.services, vec!["compute", "jobs"]);
        assert_eq!(config.name_match, "etl");
        assert!(config.mounts);
        assert_eq!(config.admin, Some(false));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.last_active_days, 3650);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ExportConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExportError::InvalidConfig(_))));
    }
}

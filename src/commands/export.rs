use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Args;

use crate::api::{RestClient, SnapshotApi, WorkspaceApi};
use crate::context::Context;
use crate::exporter::config::ExportConfig;
use crate::exporter::{self, ExportOutcome};

/// Options of the `export` sub-command
///
/// Flags override values loaded from `--config`.
#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// YAML file with export settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Services to export, comma separated (defaults to all)
    #[arg(short, long, value_delimiter = ',')]
    pub services: Vec<String>,

    /// Only list resources whose name matches (substring or glob)
    #[arg(short, long = "match", value_name = "PATTERN")]
    pub name_match: Option<String>,

    /// Skip clusters inactive for longer than this many days
    #[arg(long, value_name = "DAYS")]
    pub last_active_days: Option<i64>,

    /// Force admin mode on or off instead of detecting it
    #[arg(long, value_name = "BOOL")]
    pub admin: Option<bool>,

    /// Also export storage mounts
    ///
    /// Against a live workspace the mount table is read by running a command
    /// on the cluster given with --mount-cluster.
    #[arg(long)]
    pub mounts: bool,

    /// Running cluster used to list mounts
    #[arg(long, value_name = "CLUSTER_ID", env = "DATABRICKS_MOUNT_CLUSTER", conflicts_with = "snapshot")]
    pub mount_cluster: Option<String>,

    /// Maximum number of resource kinds listed at the same time
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Directory for the generated files
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Workspace URL
    #[arg(long, env = "DATABRICKS_HOST", conflicts_with = "snapshot")]
    pub host: Option<String>,

    /// Personal access token
    #[arg(long, env = "DATABRICKS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Export from an offline workspace snapshot (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

pub struct ExportCommand;

impl ExportCommand {
    /// Execute the export command, returning the process exit code
    pub fn execute(ctx: &Context, args: ExportArgs) -> Result<i32> {
        let config = Self::resolve_config(ctx, &args)?;
        let api = Self::connect(ctx, &args, config.mounts)?;

        ctx.output.section("Workspace export");
        ctx.output
            .key_value("Output", &config.output_dir.display().to_string());
        if !config.services.is_empty() {
            ctx.output.key_value("Services", &config.services.join(", "));
        }

        let outcome = exporter::run(api, &*ctx.fs, config).context("Export failed")?;
        Self::display_outcome(ctx, &outcome);
        Ok(outcome.report.exit_code())
    }

    /// Config file first, then command line flags on top
    fn resolve_config(ctx: &Context, args: &ExportArgs) -> Result<ExportConfig> {
        let mut config = match &args.config {
            Some(path) => ExportConfig::load(&*ctx.fs, path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ExportConfig::default(),
        };

        if !args.services.is_empty() {
            config.services = args.services.clone();
        }
        if let Some(pattern) = &args.name_match {
            config.name_match = pattern.clone();
        }
        if let Some(days) = args.last_active_days {
            config.last_active_days = days;
        }
        if args.admin.is_some() {
            config.admin = args.admin;
        }
        if args.mounts {
            config.mounts = true;
        }
        if let Some(concurrency) = args.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(output) = &args.output {
            config.output_dir = output.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn connect(ctx: &Context, args: &ExportArgs, mounts: bool) -> Result<Arc<dyn WorkspaceApi>> {
        if let Some(path) = &args.snapshot {
            return Ok(Arc::new(Self::load_snapshot(ctx, path)?));
        }

        let (Some(host), Some(token)) = (&args.host, &args.token) else {
            bail!("Set --host and --token (or DATABRICKS_HOST and DATABRICKS_TOKEN), or pass --snapshot");
        };
        let mut client = RestClient::new(host, token)
            .with_context(|| format!("Failed to create client for {}", host))?;
        match &args.mount_cluster {
            Some(cluster_id) => client = client.with_mount_cluster(cluster_id),
            None if mounts => {
                ctx.output
                    .warning("--mounts without --mount-cluster: mounts cannot be listed");
            }
            None => {}
        }
        Ok(Arc::new(client))
    }

    fn load_snapshot(ctx: &Context, path: &Path) -> Result<SnapshotApi> {
        SnapshotApi::from_file(&*ctx.fs, path)
            .with_context(|| format!("Failed to load snapshot {}", path.display()))
    }

    fn display_outcome(ctx: &Context, outcome: &ExportOutcome) {
        outcome.report.render(&*ctx.output);
        ctx.output.dimmed(&format!(
            "{} blocks, {} files, {} variables",
            outcome.artifacts.blocks.len(),
            outcome.artifacts.files.len(),
            outcome.artifacts.variables.len()
        ));
        for path in &outcome.written {
            ctx.output.dimmed(&format!("  {}", path.display()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{FileSystem, MockFileSystem, MockOutput};

    fn snapshot_yaml() -> &'static str {
        r#"
me: ann@example.com
users:
  - id: u1
    userName: ann@example.com
    displayName: Ann
    active: true
clusters:
  - cluster_id: 0101-abc-def
    cluster_name: etl
    cluster_source: UI
    spark_version: 13.3.x-scala2.12
    node_type_id: i3.xlarge
    num_workers: 2
"#
    }

    fn context_with_snapshot() -> (Context, Arc<MockFileSystem>, Arc<MockOutput>) {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(Path::new("/ws.yaml"), snapshot_yaml()).unwrap();
        let output = Arc::new(MockOutput::new());
        let ctx = Context::test_with(fs.clone(), output.clone());
        (ctx, fs, output)
    }

    #[test]
    fn test_export_from_snapshot() {
        let (ctx, fs, output) = context_with_snapshot();
        let args = ExportArgs {
            snapshot: Some(PathBuf::from("/ws.yaml")),
            services: vec!["compute".to_string()],
            output: Some(PathBuf::from("/out")),
            ..Default::default()
        };

        let code = ExportCommand::execute(&ctx, args).unwrap();

        assert_eq!(code, 0);
        assert!(fs.has_file(Path::new("/out/compute.tf")));
        assert!(output.to_text().contains("Exported 1 resources"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let (ctx, fs, _) = context_with_snapshot();
        fs.write(
            Path::new("/export.yaml"),
            "services: [jobs]\nmatch: etl\nmounts: true\nconcurrency: 2\n",
        )
        .unwrap();
        let args = ExportArgs {
            config: Some(PathBuf::from("/export.yaml")),
            services: vec!["compute".to_string()],
            concurrency: Some(8),
            ..Default::default()
        };

        let config = ExportCommand::resolve_config(&ctx, &args).unwrap();

        assert_eq!(config.services, vec!["compute".to_string()]);
        assert_eq!(config.name_match, "etl");
        assert!(config.mounts);
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_connection_is_required() {
        let (ctx, _, _) = context_with_snapshot();
        let err = ExportCommand::connect(&ctx, &ExportArgs::default(), false).err().unwrap();
        assert!(err.to_string().contains("--snapshot"));
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let (ctx, _, _) = context_with_snapshot();
        let args = ExportArgs {
            snapshot: Some(PathBuf::from("/ws.yaml")),
            services: vec!["billing".to_string()],
            output: Some(PathBuf::from("/out")),
            ..Default::default()
        };

        let err = ExportCommand::execute(&ctx, args).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown service 'billing'"));
    }

    #[test]
    fn test_mounts_without_cluster_warn() {
        let (ctx, _, output) = context_with_snapshot();
        let args = ExportArgs {
            host: Some("adb-1.azuredatabricks.net".to_string()),
            token: Some("dapi-token".to_string()),
            ..Default::default()
        };

        ExportCommand::connect(&ctx, &args, true).unwrap();
        assert!(output.to_text().contains("--mount-cluster"));

        let with_cluster = ExportArgs {
            mount_cluster: Some("0101-abc-def".to_string()),
            ..args
        };
        let quiet = Arc::new(MockOutput::new());
        let ctx = Context::test_with(Arc::new(MockFileSystem::new()), quiet.clone());
        ExportCommand::connect(&ctx, &with_cluster, true).unwrap();
        assert!(quiet.get_messages().is_empty());
    }
}

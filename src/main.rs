use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hcp_backup_tracker::config::{
    DATA_UPLOAD_CHECK_PACE_KEY, DATA_UPLOAD_TIMEOUT_KEY, MIGRATION_KEY, PROPAGATION_TIMEOUT_KEY,
};
use hcp_backup_tracker::controller::{
    BackupJobContext, BackupTracker, HostedClusterClient, KubeClusterClient,
};
use hcp_backup_tracker::TrackerConfig;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pause the hosted workload, wait for volume data to be durable, resume
    Track(JobArgs),
    /// Show the data-movement progress of a backup without changing anything
    Status(JobArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct JobArgs {
    /// Name of the backup to track
    #[arg(long, env = "BACKUP_NAME")]
    backup_name: String,

    /// Namespace of the backup object and its data-movement jobs
    #[arg(long, env = "VELERO_NAMESPACE", default_value = "openshift-adp")]
    backup_namespace: String,

    /// Namespaces included in the backup (repeat or comma-separate)
    #[arg(
        long = "namespace",
        env = "INCLUDED_NAMESPACES",
        value_delimiter = ',',
        required = true
    )]
    namespaces: Vec<String>,

    /// Plugin configuration file (flat YAML mapping or ConfigMap manifest)
    #[arg(long, env = "PLUGIN_CONFIG")]
    config: Option<PathBuf>,

    /// Data-movement deadline in minutes
    #[arg(long, env = "DATA_UPLOAD_TIMEOUT")]
    data_upload_timeout: Option<u64>,

    /// Seconds between data-movement checks
    #[arg(long, env = "DATA_UPLOAD_CHECK_PACE")]
    data_upload_check_pace: Option<u64>,

    /// Pause propagation deadline in seconds
    #[arg(long, env = "PROPAGATION_TIMEOUT")]
    propagation_timeout: Option<u64>,

    /// Leave the workload paused after the backup
    #[arg(long, env = "MIGRATION")]
    migration: bool,

    /// Volumes are backed up by the node agent instead of snapshots
    #[arg(long, env = "DEFAULT_VOLUMES_TO_FS_BACKUP")]
    fs_backup: bool,
}

impl JobArgs {
    fn tracker_config(&self) -> anyhow::Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => TrackerConfig::default(),
        };

        let mut overrides = BTreeMap::new();
        if let Some(minutes) = self.data_upload_timeout {
            overrides.insert(DATA_UPLOAD_TIMEOUT_KEY.to_string(), minutes.to_string());
        }
        if let Some(seconds) = self.data_upload_check_pace {
            overrides.insert(DATA_UPLOAD_CHECK_PACE_KEY.to_string(), seconds.to_string());
        }
        if let Some(seconds) = self.propagation_timeout {
            overrides.insert(PROPAGATION_TIMEOUT_KEY.to_string(), seconds.to_string());
        }
        if self.migration {
            overrides.insert(MIGRATION_KEY.to_string(), "true".to_string());
        }
        config.apply(&overrides)?;
        Ok(config)
    }

    fn job_context(&self) -> BackupJobContext {
        BackupJobContext::new(
            self.backup_name.as_str(),
            self.backup_namespace.as_str(),
            self.namespaces.iter().map(String::as_str),
        )
        .with_fs_backup(self.fs_backup)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("hcp-backup-tracker v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Track(job) => {
            init_tracing(args.log_format);
            run_track(job).await
        }
        Commands::Status(job) => {
            init_tracing(args.log_format);
            run_status(job).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
    }
}

async fn connect() -> anyhow::Result<KubeClusterClient> {
    let client = kube::Client::try_default()
        .await
        .context("connecting to the Kubernetes API server")?;
    info!("Connected to Kubernetes cluster");
    Ok(KubeClusterClient::new(client))
}

async fn run_track(job: JobArgs) -> anyhow::Result<()> {
    let config = job.tracker_config()?;
    let client = connect().await?;

    let mut tracker = BackupTracker::discover(&client, job.job_context(), config)
        .await
        .context("discovering the hosted control plane")?;
    tracker
        .ensure_paused(&client)
        .await
        .context("pausing the hosted workload")?;
    let action = tracker
        .finalize(&client)
        .await
        .with_context(|| format!("tracking backup {}", job.backup_name))?;

    info!(backup = %job.backup_name, ?action, "Backup volume data is durable");
    Ok(())
}

async fn run_status(job: JobArgs) -> anyhow::Result<()> {
    let config = job.tracker_config()?;
    let client = connect().await?;

    let mut tracker = BackupTracker::discover(&client, job.job_context(), config)
        .await
        .context("discovering the hosted control plane")?;
    let outcomes = tracker.check(&client).await?;

    let ctx = tracker.context();
    println!("Backup:  {}/{}", ctx.backup_namespace, ctx.backup_name);
    println!("Chain:   {} (expecting {} per kind)", tracker.chain(), ctx.expected_units());
    for outcome in &outcomes {
        println!("  {outcome}");
    }
    println!("Finished: {}", tracker.is_finished());

    if let Some(cluster) = &ctx.hosted_cluster {
        let field = client.read_pause(cluster).await?;
        println!(
            "{cluster}: pausedUntil={}",
            field.value.as_deref().unwrap_or("<unset>")
        );
        for pool in client.node_pools(cluster).await? {
            let field = client.read_pause(&pool).await?;
            println!(
                "{pool}: pausedUntil={}",
                field.value.as_deref().unwrap_or("<unset>")
            );
        }
    }
    Ok(())
}

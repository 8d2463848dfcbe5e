//! Policy enforcer demo: evaluates content against a policy document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aegis_governance::audit::{AuditQuery, FileAuditJournal};
use aegis_governance::bootstrap;
use aegis_governance::config::GovernanceConfig;
use aegis_governance::policy::{
    DEFAULT_ACTIVITY, DEFAULT_USER_ROLE, EnforcementRequest, InMemoryPolicyStore, PolicyId,
    PolicyStore,
};
use aegis_governance::telemetry::{TelemetryError, init_tracing};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Aegis policy enforcer
#[derive(Parser, Debug)]
#[command(name = "policy-enforcer", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "demos/aegis.toml")]
    config: PathBuf,

    /// Path to the JSON policy document
    #[arg(short, long, global = true, default_value = "demos/policies.json")]
    policies: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate content and print the decision as JSON
    Check {
        /// Requesting user's role
        #[arg(long, default_value = DEFAULT_USER_ROLE)]
        role: String,

        /// Activity being performed
        #[arg(long, default_value = DEFAULT_ACTIVITY)]
        activity: String,

        /// Restrict evaluation to these policy ids
        #[arg(long = "scope", value_name = "POLICY_ID")]
        scope: Vec<String>,

        /// Content to evaluate
        content: String,
    },

    /// List policies in the document
    Policies,

    /// Show recent audit journal entries
    Audit {
        /// Maximum number of entries to display
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only entries whose decision evaluated this policy
        #[arg(long, value_name = "POLICY_ID")]
        policy: Option<PolicyId>,

        /// Only denied decisions
        #[arg(long, conflicts_with = "allowed")]
        denied: bool,

        /// Only allowed decisions
        #[arg(long)]
        allowed: bool,

        /// Print counts over the matching entries instead of the entries
        #[arg(long)]
        summary: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GovernanceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match init_tracing(&config.telemetry) {
        Ok(()) | Err(TelemetryError::AlreadyInitialized(_)) => {}
        Err(err) => return Err(err.into()),
    }

    match cli.command {
        Commands::Check {
            role,
            activity,
            scope,
            content,
        } => check(&config, &cli.policies, role, activity, scope, content).await,
        Commands::Policies => list_policies(&cli.policies),
        Commands::Audit {
            limit,
            policy,
            denied,
            allowed,
            summary,
        } => {
            let mut query = AuditQuery::new();
            if let Some(policy) = policy {
                query = query.policy(policy);
            }
            if denied {
                query = query.denied();
            } else if allowed {
                query = query.allowed();
            }
            if summary {
                summarise_audit(&config, &query).await
            } else {
                show_audit(&config, &query.limit(limit)).await
            }
        }
    }
}

fn load_store(path: &Path) -> Result<InMemoryPolicyStore> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    InMemoryPolicyStore::from_json_slice(&bytes)
        .with_context(|| format!("loading policies from {}", path.display()))
}

async fn check(
    config: &GovernanceConfig,
    policies: &Path,
    user_role: String,
    activity_type: String,
    scope: Vec<String>,
    content: String,
) -> Result<()> {
    let policy_scope = (!scope.is_empty()).then_some(scope);

    let store: Arc<dyn PolicyStore> = Arc::new(load_store(policies)?);
    let engine = bootstrap::build_engine(config, store).await?;
    let decision = engine
        .decide_request(EnforcementRequest {
            content,
            user_role,
            activity_type,
            policy_scope,
        })
        .await?;

    engine.audit().wait_idle().await;
    println!("{}", serde_json::to_string_pretty(&decision)?);

    if decision.allowed() {
        info!("content allowed");
    } else {
        warn!(actions = ?decision.enforcement_actions(), "content not allowed");
    }
    Ok(())
}

fn list_policies(path: &Path) -> Result<()> {
    let store = load_store(path)?;
    for policy in store.list(None)? {
        println!(
            "{:<12} {:<9} v{:<3} {:>2} rules  {}",
            policy.id().as_str(),
            format!("{:?}", policy.status()).to_lowercase(),
            policy.version(),
            policy.rules().len(),
            policy.name()
        );
    }
    Ok(())
}

async fn open_journal(config: &GovernanceConfig) -> Result<FileAuditJournal> {
    let Some(path) = &config.audit.journal_path else {
        bail!("no audit journal configured; set [audit].journal_path or AEGIS_AUDIT_JOURNAL");
    };
    Ok(FileAuditJournal::open(path).await?)
}

async fn show_audit(config: &GovernanceConfig, query: &AuditQuery) -> Result<()> {
    let journal = open_journal(config).await?;
    for record in journal.query(query).await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

async fn summarise_audit(config: &GovernanceConfig, query: &AuditQuery) -> Result<()> {
    let journal = open_journal(config).await?;
    let summary = journal.summary(query).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

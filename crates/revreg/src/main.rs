use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info};

use revreg::{initialize_root, RootConfig, RootError, RootState, StoreBackend};
use revreg_core::{CredDefId, IssuerId, RegistryId, RegistryState, SchemaId};
use revreg_engine::{OutcomeKind, RevocationOutcome};

/// revreg: revocation registry lifecycle for anonymous credentials
///
/// Creates and rolls over revocation registries, hands out credential
/// indices and revokes them in batches.
#[derive(Parser, Debug)]
#[command(name = "revreg", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory and write a default configuration
    Init {
        /// Data directory for revreg state
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Store backend: sqlite or memory
        #[arg(long)]
        backend: Option<String>,
    },

    /// Manage credential definitions
    #[command(subcommand)]
    CredDef(CredDefCommand),

    /// Manage revocation registries
    #[command(subcommand)]
    Registry(RegistryCommand),

    /// Show the registry new credentials are issued against
    Active {
        cred_def_id: String,
    },

    /// Issue a credential
    Issue {
        cred_def_id: String,

        /// Attribute as name=value (repeatable)
        #[arg(long = "attr", value_parser = parse_attribute)]
        attrs: Vec<(String, String)>,
    },

    /// Revoke credential indices of a registry
    Revoke {
        registry_id: String,

        #[arg(required = true, allow_negative_numbers = true)]
        indices: Vec<i64>,

        /// Record the indices as pending instead of revoking now
        #[arg(long)]
        defer: bool,
    },

    /// Revoke every pending index of a registry
    PublishPending {
        registry_id: String,
    },

    /// Show a registry with its index state and status list
    Status {
        registry_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum CredDefCommand {
    /// Create and register a credential definition
    Create {
        #[arg(long)]
        issuer: String,

        #[arg(long)]
        schema: String,

        /// Schema attribute name; repeat for each attribute
        #[arg(long = "attr", required = true)]
        attrs: Vec<String>,

        #[arg(long, default_value = "default")]
        tag: String,

        /// Create a definition that does not support revocation
        #[arg(long)]
        no_revocation: bool,
    },

    /// Complete a pending registration under its final identifier
    Finish {
        job_id: String,
        cred_def_id: String,
    },

    /// List credential definitions
    List {
        #[arg(long)]
        issuer: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// Create and register a revocation registry
    Create {
        cred_def_id: String,

        /// Capacity; defaults to registry.default_capacity
        #[arg(long)]
        capacity: Option<u32>,

        /// Tag; a random one is generated when absent
        #[arg(long)]
        tag: Option<String>,
    },

    /// Complete a pending registration or status list publication
    Finish {
        registry_id: String,

        /// Job id the registry is stored under while its registration is pending
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Publish the first status list of a posted registry
    Publish {
        registry_id: String,
    },

    /// List registries
    List {
        #[arg(long)]
        cred_def_id: Option<String>,

        #[arg(long)]
        state: Option<RegistryState>,
    },

    /// Move a registry to another lifecycle state
    SetState {
        registry_id: String,
        state: RegistryState,
    },
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("revreg=debug,revreg_engine=debug,revreg_store=debug,revreg_registrar=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("revreg=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RootConfig, RootError> {
    match path {
        Some(p) => RootConfig::load(p),
        None => {
            let default_path = RootConfig::default_config_path();
            RootConfig::load(&default_path)
        }
    }
}

/// Run engine work on the blocking pool; accumulator updates and store
/// transactions are synchronous.
async fn blocking<T, F>(f: F) -> Result<T, RootError>
where
    F: FnOnce() -> Result<T, RootError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RootError::Internal(format!("blocking task failed: {}", e)))?
}

async fn open(config_path: Option<&PathBuf>) -> Result<RootState, RootError> {
    let config = load_config(config_path)?;
    blocking(move || initialize_root(config)).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RootError> {
    let config_path = cli.config.as_ref();
    match cli.command {
        Commands::Init { data_dir, backend } => cmd_init(config_path, data_dir, backend).await,
        Commands::CredDef(cmd) => cmd_cred_def(config_path, cmd).await,
        Commands::Registry(cmd) => cmd_registry(config_path, cmd).await,
        Commands::Active { cred_def_id } => cmd_active(config_path, cred_def_id).await,
        Commands::Issue { cred_def_id, attrs } => cmd_issue(config_path, cred_def_id, attrs).await,
        Commands::Revoke {
            registry_id,
            indices,
            defer,
        } => cmd_revoke(config_path, registry_id, indices, defer).await,
        Commands::PublishPending { registry_id } => {
            cmd_publish_pending(config_path, registry_id).await
        }
        Commands::Status { registry_id } => cmd_status(config_path, registry_id).await,
    }
}

async fn cmd_init(
    config_path: Option<&PathBuf>,
    data_dir: Option<PathBuf>,
    backend: Option<String>,
) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;

    if let Some(dd) = data_dir {
        config.data_dir = dd;
    }
    if let Some(b) = backend {
        config.store.backend = match b.as_str() {
            "sqlite" => StoreBackend::Sqlite,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(RootError::Config(format!(
                    "backend must be 'sqlite' or 'memory', got '{}'",
                    other
                )))
            }
        };
    }

    info!("initializing revreg");

    std::fs::create_dir_all(&config.data_dir)?;
    let state = blocking({
        let config = config.clone();
        move || initialize_root(config)
    })
    .await?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(RootConfig::default_config_path);
    config.save(&save_path)?;

    println!("revreg initialized successfully.");
    println!("  Data dir: {}", state.config.data_dir.display());
    if state.config.store.backend == StoreBackend::Sqlite {
        println!("  Database: {}", state.config.database_path().display());
    }
    println!("  Config:   {}", save_path.display());

    Ok(())
}

async fn cmd_cred_def(config_path: Option<&PathBuf>, cmd: CredDefCommand) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let cred_defs = state.service.cred_defs();
        match cmd {
            CredDefCommand::Create {
                issuer,
                schema,
                attrs,
                tag,
                no_revocation,
            } => {
                let attr_names: Vec<&str> = attrs.iter().map(String::as_str).collect();
                let def = cred_defs.register_credential_definition(
                    &IssuerId::new(issuer),
                    &SchemaId::new(schema),
                    &attr_names,
                    &tag,
                    !no_revocation,
                )?;
                println!("Credential definition: {}", def.id);
                println!("  State:              {}", def.state);
                println!("  Supports revocation: {}", def.support_revocation);
                println!(
                    "  Attributes:         {}",
                    def.attr_names.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                print_pending_jobs(&state);
            }
            CredDefCommand::Finish {
                job_id,
                cred_def_id,
            } => {
                let def = cred_defs
                    .finish_credential_definition(&job_id, &CredDefId::new(cred_def_id))?;
                println!("Credential definition {} is {}", def.id, def.state);
            }
            CredDefCommand::List { issuer } => {
                let issuer = issuer.map(IssuerId::new);
                let defs = cred_defs.list(issuer.as_ref())?;
                println!("Credential definitions ({}):", defs.len());
                for def in defs {
                    println!(
                        "  {}  [{}] revocation={}",
                        def.id, def.state, def.support_revocation
                    );
                }
            }
        }
        Ok(())
    })
    .await
}

async fn cmd_registry(
    config_path: Option<&PathBuf>,
    cmd: RegistryCommand,
) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let registries = state.service.registries();
        match cmd {
            RegistryCommand::Create {
                cred_def_id,
                capacity,
                tag,
            } => {
                let cred_def_id = CredDefId::new(cred_def_id);
                let cred_def = state.service.cred_defs().get(&cred_def_id)?;
                let def = registries.create_registry(
                    &cred_def.issuer_id,
                    &cred_def_id,
                    capacity.unwrap_or(state.config.registry.default_capacity),
                    state.config.registry.registry_type,
                    &tag.unwrap_or_else(revreg_engine::registry::new_registry_tag),
                )?;
                println!("Registry: {}", def.id);
                println!("  State:    {}", def.state);
                println!("  Capacity: {}", def.max_cred_num);
                println!("  Tails:    {}", def.tails_location);
                print_pending_jobs(&state);
            }
            RegistryCommand::Finish {
                registry_id,
                job_id,
            } => {
                let registry_id = RegistryId::new(registry_id);
                let def = match job_id {
                    Some(job_id) => registries.finish_registration(&job_id, &registry_id)?,
                    None => registries.finish_status_list(&registry_id)?,
                };
                println!("Registry {} is {}", def.id, def.state);
            }
            RegistryCommand::Publish { registry_id } => {
                let def = registries.publish_status_list(&RegistryId::new(registry_id))?;
                println!("Registry {} is {}", def.id, def.state);
                print_pending_jobs(&state);
            }
            RegistryCommand::List { cred_def_id, state: wanted } => {
                let cred_def_id = cred_def_id.map(CredDefId::new);
                let defs = registries.list_registries(cred_def_id.as_ref(), wanted)?;
                println!("Registries ({}):", defs.len());
                for def in defs {
                    println!(
                        "  {}  [{}] capacity={} created={}",
                        def.id,
                        def.state,
                        def.max_cred_num,
                        def.created_at.to_rfc3339()
                    );
                }
            }
            RegistryCommand::SetState {
                registry_id,
                state: to,
            } => {
                let def = registries.set_registry_state(&RegistryId::new(registry_id), to)?;
                println!("Registry {} is {}", def.id, def.state);
            }
        }
        Ok(())
    })
    .await
}

async fn cmd_active(config_path: Option<&PathBuf>, cred_def_id: String) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let cred_def_id = CredDefId::new(cred_def_id);
        match state.service.selector().get_active_registry(&cred_def_id)? {
            Some(def) => {
                let index = state.service.registries().index_state(&def.id)?;
                println!("Active registry: {}", def.id);
                println!("  Issued:    {}/{}", index.current_index, index.max_capacity);
                println!("  Remaining: {}", index.remaining());
            }
            None => {
                println!("No active registry for {} yet; one is being prepared.", cred_def_id);
            }
        }
        Ok(())
    })
    .await
}

async fn cmd_issue(
    config_path: Option<&PathBuf>,
    cred_def_id: String,
    attrs: Vec<(String, String)>,
) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let values: BTreeMap<String, String> = attrs.into_iter().collect();
        let credential = state
            .service
            .issuer()
            .issue_credential(&CredDefId::new(cred_def_id), &values)?;
        println!("{}", serde_json::to_string_pretty(&credential)?);
        Ok(())
    })
    .await
}

async fn cmd_revoke(
    config_path: Option<&PathBuf>,
    registry_id: String,
    indices: Vec<i64>,
    defer: bool,
) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let registry_id = RegistryId::new(registry_id);
        let revocation = state.service.revocation();
        if defer {
            let marked = revocation.mark_pending(&registry_id, &indices)?;
            println!("Pending revocations for {}: {:?}", registry_id, marked.pending);
            for failed in &marked.rejected {
                println!("  Rejected {}: {}", failed.index, failed.reason);
            }
            return Ok(());
        }

        let outcome = revocation.revoke(&registry_id, &indices)?;
        print_outcome(&outcome);
        Ok(())
    })
    .await
}

async fn cmd_publish_pending(
    config_path: Option<&PathBuf>,
    registry_id: String,
) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let registry_id = RegistryId::new(registry_id);
        match state.service.revocation().publish_pending(&registry_id)? {
            Some(outcome) => print_outcome(&outcome),
            None => println!("No pending revocations for {}", registry_id),
        }
        Ok(())
    })
    .await
}

async fn cmd_status(config_path: Option<&PathBuf>, registry_id: String) -> Result<(), RootError> {
    let state = open(config_path).await?;

    blocking(move || {
        let registry_id = RegistryId::new(registry_id);
        let def = state.service.registries().get_registry(&registry_id)?;
        let index = state.service.registries().index_state(&registry_id)?;

        println!("Registry: {}", def.id);
        println!("  Credential definition: {}", def.cred_def_id);
        println!("  State:                 {}", def.state);
        println!("  Type:                  {}", def.registry_type);
        println!("  Issued:                {}/{}", index.current_index, index.max_capacity);
        println!("  Created:               {}", def.created_at.to_rfc3339());

        match state.service.revocation().status_list(&registry_id) {
            Ok(list) => {
                let revoked = list.revoked_indices();
                println!("  Status list timestamp: {}", format_timestamp(list.timestamp));
                println!("  Revoked ({}):          {:?}", revoked.len(), revoked);
            }
            Err(revreg_engine::EngineError::NotFound { .. }) => {
                println!("  Status list:           not published");
            }
            Err(e) => return Err(e.into()),
        }

        let pending = state.service.revocation().pending(&registry_id)?;
        if !pending.is_empty() {
            println!("  Pending revocations:   {:?}", pending);
        }
        Ok(())
    })
    .await
}

fn format_timestamp(timestamp: Option<u64>) -> String {
    timestamp
        .and_then(|t| i64::try_from(t).ok())
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "none".to_string())
}

fn print_outcome(outcome: &RevocationOutcome) {
    let kind = match outcome.kind() {
        OutcomeKind::FullySucceeded => "all requested indices revoked",
        OutcomeKind::PartiallySucceeded => "some requested indices revoked",
        OutcomeKind::NothingToDo => "nothing to revoke",
    };
    println!("Revocation of {}: {}", outcome.registry_id, kind);
    if !outcome.revoked.is_empty() {
        println!("  Revoked: {:?}", outcome.revoked);
    }
    for failed in &outcome.failed {
        println!("  Skipped {}: {}", failed.index, failed.reason);
    }
    println!("  Attempts: {}", outcome.attempts);
}

fn print_pending_jobs(state: &RootState) {
    for (job_id, final_id) in state.registrar.pending_jobs() {
        println!("  Pending job {} will be registered as {}", job_id, final_id);
    }
}

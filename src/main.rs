use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use benchlog::auth::TokenGenerator;
use benchlog::config::ServerConfig;
use benchlog::server::{AppState, create_router};
use benchlog::service::normalize_email;
use benchlog::storage::FsObjectStore;
use benchlog::store::{SqliteStore, Store};
use benchlog::types::User;

const NOT_INITIALIZED: &str =
    "Server not initialized. Run 'benchlog admin init' first to create the database and admin token.";

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "benchlog")]
#[command(about = "A research experiment tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// TOML config file; flags below override its values
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Host to bind to [default: 127.0.0.1]
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to [default: 8080]
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database and stored objects [default: ./data]
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Public base URL for external access (e.g., "https://lab.example.com").
        /// Used for object download URLs. Defaults to http://{host}:{port}.
        #[arg(long)]
        public_base_url: Option<String>,

        /// Largest accepted upload in bytes [default: 10 MiB]
        #[arg(long)]
        max_upload_bytes: Option<usize>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database and admin token)
    Init {
        /// Data directory for the database and stored objects
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },
}

fn run_init(data_dir: PathBuf, non_interactive: bool) -> anyhow::Result<()> {
    let config = ServerConfig {
        data_dir,
        ..ServerConfig::default()
    };
    fs::create_dir_all(&config.data_dir)?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let token_file = config.admin_token_path();

    if store.has_admin_token()? {
        bail!(
            "Server already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    let generator = TokenGenerator::new()?;
    let (token, raw_token) = generator.issue(true, None, None)?;

    store.create_token(&token)?;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();

    if !non_interactive {
        create_first_user_prompt(&store, &generator)?;
    }

    Ok(())
}

fn create_first_user_prompt(store: &SqliteStore, generator: &TokenGenerator) -> anyhow::Result<()> {
    let create_user = inquire::Confirm::new("Would you like to create a first user?")
        .with_default(false)
        .prompt()?;

    if !create_user {
        return Ok(());
    }

    let email = inquire::Text::new("Email:")
        .with_validator(|input: &str| match normalize_email(input) {
            Ok(_) => Ok(inquire::validator::Validation::Valid),
            Err(e) => Ok(inquire::validator::Validation::Invalid(e.to_string().into())),
        })
        .prompt()?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: normalize_email(&email)?,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    let (user_token, raw_token) = generator.issue(false, Some(user.id.clone()), None)?;
    store.create_token(&user_token)?;

    println!();
    println!("========================================");
    println!("Created user '{}' with token:", user.email);
    println!();
    println!("  {raw_token}");
    println!();
    println!("========================================");
    println!();

    Ok(())
}

struct ServeOverrides {
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    public_base_url: Option<String>,
    max_upload_bytes: Option<usize>,
}

fn load_config(path: Option<&Path>, overrides: ServeOverrides) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(host) = overrides.host {
        config.host = host;
    }
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(data_dir) = overrides.data_dir {
        config.data_dir = data_dir;
    }
    if overrides.public_base_url.is_some() {
        config.public_base_url = overrides.public_base_url;
    }
    if let Some(max_upload_bytes) = overrides.max_upload_bytes {
        config.max_upload_bytes = max_upload_bytes;
    }

    Ok(config)
}

async fn run_serve(config: ServerConfig) -> anyhow::Result<()> {
    let token_file = config.admin_token_path();
    if !token_file.exists() {
        bail!(NOT_INITIALIZED);
    }

    let store = SqliteStore::new(config.db_path())?;
    if !store.has_admin_token()? {
        bail!(NOT_INITIALIZED);
    }

    info!("Admin token available at {}", token_file.display());

    let objects = FsObjectStore::new(&config.objects_dir(), config.base_url());
    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(objects),
        config.max_upload_bytes,
    )?);

    let app = create_router(state);
    let addr = config.socket_addr()?;

    info!(
        max_upload_bytes = config.max_upload_bytes,
        "Starting server on {} (objects served from {})",
        addr,
        config.base_url()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("benchlog=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                non_interactive,
            } => {
                run_init(data_dir, non_interactive)?;
            }
        },
        Commands::Serve {
            config,
            host,
            port,
            data_dir,
            public_base_url,
            max_upload_bytes,
        } => {
            let config = load_config(
                config.as_deref(),
                ServeOverrides {
                    host,
                    port,
                    data_dir,
                    public_base_url,
                    max_upload_bytes,
                },
            )?;
            run_serve(config).await?;
        }
    }

    Ok(())
}

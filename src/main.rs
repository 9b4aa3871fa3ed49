//! mybook server entry point.

use clap::Parser;
use mybook::{
    auth::AuthService,
    config::{Cli, Command, Config, UserCommand},
    db::{Database, timestamp_to_datetime},
    server,
    users::UserService,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database and upload directory
    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    std::fs::create_dir_all(&config.uploads.avatars_dir)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!(
        "Then run: mybook user add <username> --email <email> --password <password> --role admin"
    );

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db.clone(), &config.auth);

    match action {
        UserCommand::Add {
            username,
            email,
            password,
            role,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &email, &password, &role)?;
            println!(
                "Created user: {} <{}> (role: {}, id: {})",
                user.username, user.email, user.role, user.id
            );
        }

        UserCommand::Del { username } => match db.get_user_by_username(&username)? {
            Some(user) => {
                UserService::new(db.clone(), &config.uploads)
                    .delete(&user.id)
                    .await?;
                println!("Deleted user: {}", username);
            }
            None => println!("User not found: {}", username),
        },

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<20} {:<30} {:<6} {:<9} LAST LOGIN",
                    "USERNAME", "EMAIL", "ROLE", "VERIFIED"
                );
                println!("{}", "-".repeat(90));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| timestamp_to_datetime(ts).format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<20} {:<30} {:<6} {:<9} {}",
                        user.username,
                        user.email,
                        user.role,
                        if user.is_verified { "yes" } else { "no" },
                        last_login
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::Promote { username, revoke } => {
            let role = if revoke { "user" } else { "admin" };
            if auth.set_role(&username, role)? {
                println!("{} is now: {}", username, role);
            } else {
                println!("User not found: {}", username);
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mybook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Open database
    let db = Database::open(&config.database.path)?;

    // Create auth service
    let auth = AuthService::new(db.clone(), &config.auth)
        .with_public_url(config.server.public_url.clone());

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        catalog = %config.catalog.base_url,
        "Starting mybook server"
    );

    if db.list_users()?.is_empty() {
        tracing::warn!(
            "No users yet. Create an admin with: mybook user add <name> --email <email> --role admin"
        );
    }

    // Create application state
    let state = server::AppState::new_with_db(config.clone(), db, auth)?;
    state.start_session_cleanup();

    // Create router
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}

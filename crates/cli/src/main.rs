//! Kundura CLI - Operator tools for the shop.
//!
//! # Usage
//!
//! ```bash
//! # Apply storage-layer constraints
//! kundura migrate
//!
//! # Load brands, products and slides from a catalog file
//! kundura seed catalog.yaml
//!
//! # Check a catalog file against a throwaway in-memory store
//! kundura --memory seed catalog.yaml
//!
//! # Notify everyone, then take it back
//! kundura notify send -t "Kampanya" -m "50% off" -k promotional
//! kundura notify retract -t "Kampanya" -m "50% off" -k promotional
//!
//! # Ban a user
//! kundura role set 6f1c... banned
//!
//! # Follow a cart as it changes
//! kundura --email customer@example.com cart watch
//! ```
//!
//! # Environment Variables
//!
//! - `SUPABASE_URL`, `SUPABASE_ANON_KEY` - Hosted backend
//! - `SUPABASE_DB_URL` - Direct `PostgreSQL` connection, for `migrate` only
//! - `KUNDURA_EMAIL`, `KUNDURA_PASSWORD` - Account to act as
//! - `SENTRY_DSN` - Error tracking
//! - `RUST_LOG` - Log filter (default `kundura=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kundura_core::{AppRole, NotificationKind, UserId};

mod commands;

use commands::Account;

#[derive(Parser)]
#[command(name = "kundura")]
#[command(author, version, about = "Kundura operator tools")]
struct Cli {
    /// Run against an empty in-memory store instead of the hosted backend
    #[arg(long, global = true)]
    memory: bool,

    /// Account to act as (defaults to `KUNDURA_EMAIL`)
    #[arg(long, global = true)]
    email: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply storage-layer constraints to the database
    Migrate,
    /// Load a catalog from a YAML file
    Seed {
        /// Catalog file
        file: String,
    },
    /// Send, list and retract notifications
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },
    /// Manage user roles
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },
    /// Inspect the signed-in user's cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum NotifyAction {
    /// Send a notification to one user or to everyone
    Send {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        message: String,

        /// Category (`informational`, `promotional`, `critical`)
        #[arg(short, long, default_value = "informational")]
        kind: NotificationKind,

        /// Only this user; everyone when omitted
        #[arg(short, long)]
        user: Option<UserId>,
    },
    /// Delete every copy of a sent notification
    Retract {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        message: String,

        #[arg(short, long, default_value = "informational")]
        kind: NotificationKind,
    },
    /// Summarise notifications already sent
    List,
}

#[derive(Subcommand)]
enum RoleAction {
    /// Give a user exactly one role
    Set {
        user: UserId,

        /// `admin`, `user` or `banned`
        role: AppRole,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart and every change to it until interrupted
    Watch,
}

fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("SENTRY_ENVIRONMENT").ok().map(Into::into),
            ..Default::default()
        },
    )))
}

fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let sentry_guard = init_sentry();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kundura=info".into());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());
    if sentry_guard.is_some() {
        registry
            .with(sentry_tracing::layer().event_filter(sentry_event_filter))
            .init();
    } else {
        registry.init();
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        drop(sentry_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    let account = Account::new(cli.memory, cli.email);
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::run(&account, &file).await?,
        Commands::Notify { action } => match action {
            NotifyAction::Send {
                title,
                message,
                kind,
                user,
            } => commands::notify::send(&account, &title, &message, kind, user).await?,
            NotifyAction::Retract {
                title,
                message,
                kind,
            } => commands::notify::retract(&account, &title, &message, kind).await?,
            NotifyAction::List => commands::notify::list(&account).await?,
        },
        Commands::Role { action } => match action {
            RoleAction::Set { user, role } => commands::role::set(&account, user, role).await?,
        },
        Commands::Cart { action } => match action {
            CartAction::Watch => commands::cart::watch(&account).await?,
        },
    }
    Ok(())
}

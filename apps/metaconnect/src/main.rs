use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use metaconnect_core::connection::uri::{UriCodec, UriError};
use metaconnect_core::connection::{LocalProfile, MetaConnection};
use metaconnect_core::contacts::{InMemoryContacts, StoredEntry};
use metaconnect_core::exchange::{ExchangeController, Presenter, ScanOutcome};
use metaconnect_core::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use room_bus::{LocalRoomHub, RoomChannel};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let mut cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(origin = %cli.origin, name = %cli.name, "starting");

    match cli.command.take().unwrap_or(Command::Display) {
        Command::Display => handle_display(&cli),
        Command::Scan => handle_scan(&cli),
        Command::Contacts => handle_contacts(&cli),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "metaconnect",
    about = "🤝 Exchange identity profiles over QR bootstrap uris and p2p rooms",
    author,
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "METACONNECT_ORIGIN",
        default_value = "https://metaconnect.me",
        help = "Origin embedded in bootstrap uris"
    )]
    origin: String,

    #[arg(
        long,
        global = true,
        env = "METACONNECT_NAME",
        default_value = "anon",
        help = "Local profile handle"
    )]
    name: String,

    #[arg(
        long = "social-media",
        global = true,
        env = "METACONNECT_SOCIAL_MEDIA",
        default_value = "{}",
        help = "Local social-media mapping as JSON, e.g. '{\"github\":\"alice\"}'"
    )]
    social_media: String,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "METACONNECT_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "METACONNECT_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the profile banner and bootstrap uri, then treat each stdin
    /// line as an inbound room payload (default when no subcommand given)
    Display,
    /// Treat each stdin line as a decoded QR frame and run the scan flow
    Scan,
    /// Show the stored connection list
    Contacts,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Uri(#[from] UriError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid social-media mapping: {0}")]
    InvalidSocialMedia(String),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

struct Session {
    controller: ExchangeController,
    contacts: Arc<InMemoryContacts>,
}

/// Wire the controller against the loopback room. The real p2p transport is
/// an external collaborator; the loopback hub stands in for it here, the
/// same way the QR renderer and optical decoder are replaced by stdio.
fn build_session(cli: &Cli) -> Result<Session, CliError> {
    let codec = UriCodec::new(&cli.origin)?;
    let profile = LocalProfile::new(&cli.name, parse_social_media(&cli.social_media)?);

    let hub = LocalRoomHub::new();
    let room = Arc::new(hub.join(Uuid::new_v4().to_string()));
    let contacts = Arc::new(InMemoryContacts::new());
    let presenter = Arc::new(TerminalPresenter);

    let mut controller = ExchangeController::new(
        codec,
        profile,
        room.clone(),
        presenter,
        contacts.clone(),
    );
    controller.handle_connection_update(room.is_connected());
    Ok(Session {
        controller,
        contacts,
    })
}

fn parse_social_media(raw: &str) -> Result<BTreeMap<String, String>, CliError> {
    serde_json::from_str(raw).map_err(|err| CliError::InvalidSocialMedia(err.to_string()))
}

fn handle_display(cli: &Cli) -> Result<(), CliError> {
    let Session {
        mut controller,
        contacts,
    } = build_session(cli)?;

    print_profile_banner(&controller);
    match controller.bootstrap_uri() {
        Some(uri) => {
            println!("  bootstrap uri : {uri}");
            println!("  (render this string as a QR code for a peer to scan)");
        }
        None => println!("  ⏳ waiting for the room connection..."),
    }
    println!("\nListening for room payloads on stdin, EOF to quit.\n");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match controller.handle_room_message(&line) {
            Ok(Some(connection)) => {
                remember(&contacts, &connection);
                println!("❤️  {} MetaConnections", controller.contact_count());
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "dropping malformed room payload");
                eprintln!("⚠️  {err}");
            }
        }
    }
    Ok(())
}

fn handle_scan(cli: &Cli) -> Result<(), CliError> {
    let Session {
        mut controller,
        contacts,
    } = build_session(cli)?;
    controller.toggle_mode();

    println!("📷 Paste or pipe scanned frames, one per line.\n");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match controller.handle_scan(&line) {
            Ok(ScanOutcome::Completed(connection)) => {
                remember(&contacts, &connection);
                println!(
                    "\n✅ exchanged profiles with {}",
                    format_handle(&connection.name)
                );
                info!(peer = %connection.name, "exchange stored");
                break;
            }
            Ok(ScanOutcome::Ignored) => break,
            // Scan mode stays active; the next frame may decode.
            Err(err) => debug!(error = %err, "frame rejected, still scanning"),
        }
    }
    Ok(())
}

fn handle_contacts(cli: &Cli) -> Result<(), CliError> {
    let Session {
        controller,
        contacts,
    } = build_session(cli)?;

    println!("\n❤️  {} MetaConnections", controller.contact_count());
    let keys = contacts.keys();
    if keys.is_empty() {
        println!("Go make some MetaConnections");
        return Ok(());
    }
    for key in keys {
        if let Ok(connection) = controller.open_stored(&key) {
            debug!(peer = %connection.name, "opened stored connection");
        }
    }
    Ok(())
}

/// Candidates go back into the store under the mapping's own key; a repeat
/// exchange with the same peer overwrites instead of duplicating.
fn remember(contacts: &InMemoryContacts, connection: &MetaConnection) {
    contacts.insert(
        connection.name.clone(),
        StoredEntry {
            name: connection.name.clone(),
            social_media: connection.social_media.clone(),
        },
    );
}

fn print_profile_banner(controller: &ExchangeController) {
    let profile = controller.profile();
    println!("\n👩‍🚀 {}", format_handle(&profile.name));
    for (platform, handle) in &profile.social_media {
        println!("  {platform:<12} {handle}");
    }
    println!("\n❤️  {} MetaConnections", controller.contact_count());
}

fn format_handle(handle: &str) -> String {
    format!("@{}", handle.trim_start_matches('@'))
}

struct TerminalPresenter;

impl Presenter for TerminalPresenter {
    fn show_meta_connection(&self, connection: &MetaConnection) {
        let status = if connection.request {
            "pending"
        } else {
            "confirmed"
        };
        println!("\n🤝 {} ({status})", format_handle(&connection.name));
        for (platform, handle) in &connection.social_media {
            println!("  {platform:<12} {handle}");
        }
    }

    fn show_notification(&self, message: &str, is_error: bool) {
        if is_error {
            eprintln!("⚠️  {message}");
        } else {
            println!("💬 {message}");
        }
    }
}

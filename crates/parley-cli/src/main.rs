//! parley CLI: Command-line client for marketplace conversations

mod render;

use clap::{Parser, Subcommand};
use parley_engine::{
    agent_names, group_threads, search_tickets, ClientConfig, ConversationHost, ConversationKey,
    ConversationView, HttpSource, InboxFilter, MessageSource, MessageStatus, NewTicket,
    PollEvent, PreviewPolicy, Priority, SenderRole, Session, SessionStore, TicketKind, User,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Chat with agent vendors and platform support from the terminal
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .parley/ directory and config
    Init {
        /// Backend API base URL
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Sign in as a marketplace party
    Login {
        /// Party id
        id: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        /// One of user, vendor, admin
        #[arg(long, default_value = "user", value_parser = parse_role)]
        role: SenderRole,

        #[arg(long)]
        email: Option<String>,
    },

    /// Forget the signed-in party
    Logout,

    /// Show the signed-in party
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List conversations, most recent first
    Inbox {
        /// Only threads whose latest message has this status
        #[arg(long)]
        status: Option<String>,

        /// Only threads about this agent name
        #[arg(long)]
        agent: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Rank threads by message creation time, ignoring replies
        #[arg(long)]
        by_created: bool,
    },

    /// Open a conversation and keep it refreshed
    Chat {
        #[command(flatten)]
        target: Target,
    },

    /// Send one message and print the thread
    Send {
        #[command(flatten)]
        target: Target,

        /// Message text
        #[arg(short, long)]
        message: String,
    },

    /// Delete every message of a conversation
    Clear {
        #[command(flatten)]
        target: Target,
    },

    /// Change the status of a message
    Status {
        message_id: String,

        /// New, Replied, Closed or any other tag
        status: String,
    },

    /// Delete one message
    Delete { message_id: String },

    /// List your support tickets
    Tickets {
        /// Only tickets whose description or type contains this text
        #[arg(long)]
        search: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Work with support tickets
    Ticket {
        #[command(subcommand)]
        action: TicketAction,
    },
}

#[derive(Subcommand)]
enum TicketAction {
    /// Open a new support ticket
    New {
        /// What the ticket is about
        description: String,

        /// AdminSupport, bug or account
        #[arg(long = "type", default_value = "AdminSupport", value_parser = parse_kind)]
        kind: TicketKind,

        /// low, medium or high
        #[arg(long, default_value = "medium", value_parser = parse_priority)]
        priority: Priority,
    },
}

/// Which conversation a command applies to.
#[derive(clap::Args)]
struct Target {
    /// The other party: a vendor id for users, a user id for vendors
    #[arg(required_unless_present = "ticket")]
    with: Option<String>,

    /// Agent the conversation is about
    #[arg(long)]
    agent: Option<String>,

    /// Support ticket id, instead of a direct conversation
    #[arg(long, conflicts_with_all = ["with", "agent"])]
    ticket: Option<String>,
}

const PARLEY_DIR: &str = ".parley";

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { api_url } => cmd_init(api_url),
        Commands::Login {
            id,
            name,
            role,
            email,
        } => cmd_login(id, name, role, email),
        Commands::Logout => cmd_logout(),
        Commands::Whoami { json } => cmd_whoami(json),
        Commands::Inbox {
            status,
            agent,
            json,
            by_created,
        } => cmd_inbox(status, agent, json, by_created),
        Commands::Chat { target } => cmd_chat(&target),
        Commands::Send { target, message } => cmd_send(&target, &message),
        Commands::Clear { target } => cmd_clear(&target),
        Commands::Status { message_id, status } => cmd_status(&message_id, status),
        Commands::Delete { message_id } => cmd_delete(&message_id),
        Commands::Tickets { search, json } => cmd_tickets(search.as_deref(), json),
        Commands::Ticket {
            action:
                TicketAction::New {
                    description,
                    kind,
                    priority,
                },
        } => cmd_ticket_new(&description, kind, priority),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("parley_engine=debug,parley=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_role(value: &str) -> Result<SenderRole, String> {
    match value.to_ascii_lowercase().as_str() {
        "user" => Ok(SenderRole::User),
        "vendor" => Ok(SenderRole::Vendor),
        "admin" => Ok(SenderRole::Admin),
        other => Err(format!("unknown role '{other}' (expected user, vendor or admin)")),
    }
}

#[allow(clippy::unnecessary_wraps)]
fn parse_kind(value: &str) -> Result<TicketKind, String> {
    Ok(TicketKind::from(value.to_string()))
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    match value.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        other => Err(format!("unknown priority '{other}' (expected low, medium or high)")),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn load_config() -> ClientConfig {
    let path = Path::new(PARLEY_DIR).join("config.json");
    match ClientConfig::load_or_default(&path) {
        Ok(config) => config.with_env_overrides(),
        Err(e) => fail(format!("loading {}: {e}", path.display())),
    }
}

fn session_store() -> SessionStore {
    SessionStore::new(PARLEY_DIR)
}

fn signed_in() -> User {
    match session_store().load_or_anonymous().require() {
        Ok(user) => user.clone(),
        Err(e) => fail(format!("{e}. Run `parley login` first.")),
    }
}

fn http_source(config: &ClientConfig) -> Arc<HttpSource> {
    match HttpSource::new(config) {
        Ok(source) => Arc::new(source),
        Err(e) => fail(e),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => fail(format!("failed to create tokio runtime: {e}")),
    }
}

fn resolve_key(user: &User, target: &Target) -> ConversationKey {
    if let Some(ticket) = &target.ticket {
        return ConversationKey::ticket(user.id.clone(), ticket.clone());
    }
    match &target.with {
        Some(other) => user.direct_key(other, target.agent.clone()),
        None => fail("a counterpart or --ticket is required"),
    }
}

fn cmd_init(api_url: Option<String>) {
    let dir = Path::new(PARLEY_DIR);
    if let Err(e) = std::fs::create_dir_all(dir) {
        fail(format!("failed to create {}: {e}", dir.display()));
    }

    let config_path = dir.join("config.json");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return;
    }

    let mut config = ClientConfig::default();
    if let Some(url) = api_url {
        config.api_base_url = url;
    }
    if let Err(e) = config.save(&config_path) {
        fail(format!("failed to write config: {e}"));
    }
    println!("Created {}", config_path.display());
    println!("  API: {}", config.api_base_url);
    println!("\nNext: parley login <id> --role user|vendor");
}

fn cmd_login(id: String, name: Option<String>, role: SenderRole, email: Option<String>) {
    let user = User {
        name: name.unwrap_or_else(|| id.clone()),
        email,
        ..User::new(id, "", role)
    };

    let mut session = Session::anonymous();
    session.login(user);
    if let Err(e) = session_store().save(&session) {
        fail(format!("failed to save session: {e}"));
    }
    println!("Signed in as {}", render::whoami(session.current()));
}

fn cmd_logout() {
    let store = session_store();
    let mut session = store.load_or_anonymous();
    session.logout();
    if let Err(e) = store.save(&session) {
        fail(format!("failed to clear session: {e}"));
    }
    println!("Signed out");
}

fn cmd_whoami(json: bool) {
    let session = session_store().load_or_anonymous();
    if json {
        match serde_json::to_string_pretty(&session.current()) {
            Ok(out) => println!("{out}"),
            Err(e) => fail(e),
        }
        return;
    }
    println!("{}", render::whoami(session.current()));
}

fn cmd_inbox(status: Option<String>, agent: Option<String>, json: bool, by_created: bool) {
    let config = load_config();
    let user = signed_in();
    let source = http_source(&config);

    let records = match runtime().block_on(source.my_threads(&user.id, user.role)) {
        Ok(records) => records,
        Err(e) => fail(format!("failed to load inbox: {e}")),
    };

    let filter = InboxFilter {
        status: status.map(MessageStatus::from),
        agent_name: agent,
    };
    let policy = if by_created {
        PreviewPolicy::CreatedAt
    } else {
        config.preview_policy
    };
    let previews = group_threads(&filter.apply(&records), user.role, policy);

    if json {
        match serde_json::to_string_pretty(&previews) {
            Ok(out) => println!("{out}"),
            Err(e) => fail(e),
        }
        return;
    }

    println!("{}", render::inbox(&previews));
    let agents = agent_names(&records);
    if user.role == SenderRole::Vendor && !agents.is_empty() {
        println!("\nAgents: {}", agents.join(", "));
    }
}

fn cmd_send(target: &Target, message: &str) {
    let config = load_config();
    let user = signed_in();
    let key = resolve_key(&user, target);
    let source = http_source(&config);

    runtime().block_on(async {
        let view = ConversationView::new(source, key, user.role);
        if let Err(e) = view.send(message).await {
            fail(e);
        }
        println!("{}", render::transcript(&view.entries(), user.role));
    });
}

fn cmd_clear(target: &Target) {
    let config = load_config();
    let user = signed_in();
    let key = resolve_key(&user, target);
    let source = http_source(&config);

    runtime().block_on(async {
        let view = ConversationView::new(source, key, user.role);
        match view.clear().await {
            Ok(()) => println!("Cleared {}", view.key()),
            Err(e) => fail(e),
        }
    });
}

fn cmd_status(message_id: &str, status: String) {
    let config = load_config();
    let _user = signed_in();
    let source = http_source(&config);
    let status = MessageStatus::from(status);

    match runtime().block_on(source.update_status(message_id, &status)) {
        Ok(()) => println!("{message_id} marked {status}"),
        Err(e) => fail(format!("failed to update status: {e}")),
    }
}

fn cmd_delete(message_id: &str) {
    let config = load_config();
    let _user = signed_in();
    let source = http_source(&config);

    match runtime().block_on(source.delete_message(message_id)) {
        Ok(()) => println!("Deleted {message_id}"),
        Err(e) => fail(format!("failed to delete message: {e}")),
    }
}

fn cmd_tickets(search: Option<&str>, json: bool) {
    let config = load_config();
    let user = signed_in();
    let source = http_source(&config);

    let tickets = match runtime().block_on(source.my_tickets(&user.id)) {
        Ok(tickets) => tickets,
        Err(e) => fail(format!("failed to load tickets: {e}")),
    };
    let found = search_tickets(&tickets, search.unwrap_or_default());

    if json {
        match serde_json::to_string_pretty(&found) {
            Ok(out) => println!("{out}"),
            Err(e) => fail(e),
        }
        return;
    }
    println!("{}", render::tickets(&found));
}

fn cmd_ticket_new(description: &str, kind: TicketKind, priority: Priority) {
    let request = match NewTicket::new(kind, priority, description) {
        Ok(request) => request,
        Err(e) => fail(e),
    };
    let config = load_config();
    let user = signed_in();
    let source = http_source(&config);

    match runtime().block_on(source.open_ticket(&user.id, &request)) {
        Ok(ticket) => {
            println!("Opened ticket {} ({})", ticket.id, ticket.kind.label());
            println!("\nNext: parley chat --ticket {}", ticket.id);
        }
        Err(e) => fail(format!("failed to open ticket: {e}")),
    }
}

fn cmd_chat(target: &Target) {
    let config = load_config();
    let user = signed_in();
    let key = resolve_key(&user, target);
    let source = http_source(&config);

    runtime().block_on(chat_loop(source, config, user, key));
}

async fn chat_loop(source: Arc<HttpSource>, config: ClientConfig, user: User, key: ConversationKey) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut host = ConversationHost::new(source, user.role, config, event_tx);
    let view = host.open(key);
    let mut updates = view.subscribe();

    println!("Conversation {} (type /clear or /quit)", view.key());

    let mut printer = render::TranscriptPrinter::default();
    let mut last_error: Option<String> = None;
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.loaded && snapshot.entries.is_empty() && printer.is_empty() {
                    println!("{}", render::transcript(&[], user.role));
                }
                match printer.update(&snapshot.entries, user.role) {
                    Some(render::Printout::Append(lines)) => {
                        for line in lines {
                            println!("{line}");
                        }
                    }
                    Some(render::Printout::Redraw(text)) => {
                        println!("--- earlier messages arrived ---");
                        println!("{text}");
                    }
                    None => {}
                }
                if snapshot.error != last_error {
                    if let Some(error) = &snapshot.error {
                        eprintln!("{error}");
                    }
                    last_error = snapshot.error;
                }
            }
            Some(event) = event_rx.recv() => {
                debug!(?event, "poll event");
                if let PollEvent::FetchFailed { error, .. } = event {
                    eprintln!("Refresh failed: {error}");
                }
            }
            read = stdin.read_line(&mut line) => {
                match read {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("Failed to read input: {e}");
                        break;
                    }
                }
                let input = line.trim().to_string();
                line.clear();
                match input.as_str() {
                    "" => {}
                    "/quit" => break,
                    "/clear" => {
                        if view.clear().await.is_ok() {
                            printer.reset();
                            println!("Conversation cleared");
                        }
                    }
                    text => {
                        view.set_draft(text);
                        let _ = view.send_draft().await;
                    }
                }
            }
        }
    }

    host.close();
}

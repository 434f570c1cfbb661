use std::time::Instant;

use clap::Parser;
use colored::*;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mock_chat_client::api::{ApiClient, ConversationFilter};
use mock_chat_client::cli::{Args, Command};
use mock_chat_client::config::ClientConfig;
use mock_chat_client::error::ChatError;
use mock_chat_client::model::{Conversation, Message, Role, UserProfile};
use mock_chat_client::session::SessionStore;
use mock_chat_client::view::{export_csv, format_duration, ConversationView};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match ClientConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e);
            std::process::exit(1);
        }
    };

    let mut store = match SessionStore::open(&args.session) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args.command, &config, &mut store).await {
        // A rejected token wipes the whole session; a bad key drops only
        // the stored conversation.
        if e.forces_logout() {
            let _ = store.clear();
            eprintln!("{}", "session cleared, please log in again".yellow());
        } else if e.clears_conversation() {
            let _ = store.clear_conversation();
            eprintln!("{}", "stored conversation key cleared".yellow());
        }
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(
    command: Command,
    config: &ClientConfig,
    store: &mut SessionStore,
) -> Result<(), ChatError> {
    match command {
        Command::Login { email, password } => {
            let api = ApiClient::from_config(config, None);
            let resp = api.login(&email, &password).await?;
            store.set_login(resp.token, resp.user.clone())?;
            println!(
                "logged in as {} ({})",
                resp.user.name.bright_green().bold(),
                resp.user.role
            );
        }

        Command::Join { conv_key } => {
            let api = ApiClient::from_config(config, None);
            // Validate the key before storing anything locally. An ended
            // conversation is treated the same as a bad key.
            let conv = api.get_conversation(&conv_key).await?;
            if conv.ended {
                return Err(ChatError::InvalidKey { conv_key });
            }
            let resp = api.agent_login(&conv_key).await?;
            store.set_agent(
                resp.conv_key.clone(),
                resp.agent_name.clone(),
                resp.trainer_name,
            )?;
            println!(
                "joined {} as {}",
                resp.conv_key.bright_cyan().bold(),
                resp.agent_name.bright_green()
            );
        }

        Command::Create { associate, trainer } => {
            let user = require_user(store)?;
            if !user.role.is_operator() {
                return Err(ChatError::RequiresOperator { action: "create".to_string() });
            }
            let trainer_name = trainer.unwrap_or_else(|| user.name.clone());
            let api = api_for(config, store);
            let resp = api.create_conversation(&trainer_name, &associate).await?;
            store.set_conversation(resp.conv_key.clone())?;
            println!(
                "conversation created, share this key with the agent: {}",
                resp.conv_key.bright_cyan().bold()
            );
        }

        Command::List { all } => {
            let user = require_user(store)?;
            let api = api_for(config, store);
            let filter = if all {
                ConversationFilter::All
            } else {
                ConversationFilter::Trainer(user.name.clone())
            };
            let conversations = api.list_conversations(filter).await?;
            if conversations.is_empty() {
                println!("{}", "no conversations".dimmed());
            }
            for conv in &conversations {
                print_conversation_row(conv);
            }
        }

        Command::Send { text, conv_key } => {
            let user = require_user(store)?;
            let conv_key = resolve_key(conv_key, store)?;
            let api = api_for(config, store);
            let mut view = ConversationView::new(api, config, conv_key, user);
            let outcome = view.send(&text).await?;
            match outcome.confirmed {
                Some(msg) => println!(
                    "sent {} at {}",
                    msg.id.bright_cyan(),
                    if msg.timestamp.is_empty() { "-" } else { &msg.timestamp }
                ),
                None => println!("sent"),
            }
        }

        Command::Watch { conv_key, poll } => {
            let user = require_user(store)?;
            let conv_key = resolve_key(conv_key, store)?;
            let api = api_for(config, store);
            watch(api, config, conv_key, user, poll).await?;
        }

        Command::End { conv_key } => {
            let user = require_user(store)?;
            if !user.role.is_operator() {
                return Err(ChatError::RequiresOperator { action: "end".to_string() });
            }
            let conv_key = resolve_key(conv_key, store)?;
            let api = api_for(config, store);
            api.end_conversation(&conv_key, &user.name).await?;
            println!("conversation {} ended", conv_key.bright_cyan());
        }

        Command::Export { conv_key, output } => {
            let user = require_user(store)?;
            if !user.role.is_operator() {
                return Err(ChatError::RequiresOperator { action: "export".to_string() });
            }
            let conv_key = resolve_key(conv_key, store)?;
            let api = api_for(config, store);
            let messages = api.get_messages(&conv_key).await?;
            std::fs::write(&output, export_csv(&messages))?;
            println!("exported {} messages to {}", messages.len(), output.display());
        }

        Command::Logout => {
            store.clear()?;
            println!("logged out");
        }
    }
    Ok(())
}

/// Follow a conversation until Ctrl-C, rendering events as they arrive.
async fn watch(
    api: ApiClient,
    config: &ClientConfig,
    conv_key: String,
    user: UserProfile,
    poll: bool,
) -> Result<(), ChatError> {
    println!(
        "watching {} as {} (Ctrl-C to leave)",
        conv_key.bright_cyan().bold(),
        user.name.bright_green()
    );

    let mut view = ConversationView::new(api.clone(), config, conv_key, user.clone());
    let mut events = if poll {
        view.open_polling(config.poll_interval).await?
    } else {
        view.open().await?
    };
    let started = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let update = view.apply(event, true);
                if update.replaced_all {
                    println!("{}", "--- transcript ---".dimmed());
                }
                for msg in &update.rendered {
                    print_message(msg);
                    if msg.is_incoming_for(&user) && msg.role != Role::System {
                        // Terminal bell stands in for the notification sound.
                        print!("\x07");
                    }
                }
                if let Some(name) = update.typing {
                    eprintln!("{}", format!("{name} is typing...").dimmed());
                }
                if update.newly_ended {
                    println!(
                        "{}",
                        "*** Conversation has ended. No further messages can be sent. ***"
                            .bright_yellow()
                    );
                }
                if update.mark_read {
                    if let Err(e) = api.mark_read(view.conv_key(), &user.name).await {
                        debug!(error = %e, "mark-read failed");
                    }
                }
            }
        }
    }

    view.close().await;
    println!("watched for {}", format_duration(started.elapsed()));
    Ok(())
}

fn api_for(config: &ClientConfig, store: &SessionStore) -> ApiClient {
    ApiClient::from_config(config, store.session().token.clone())
}

fn require_user(store: &SessionStore) -> Result<UserProfile, ChatError> {
    match store.session().user.clone() {
        Some(user) if store.session().is_logged_in() => Ok(user),
        _ => Err(ChatError::NotLoggedIn),
    }
}

fn resolve_key(arg: Option<String>, store: &SessionStore) -> Result<String, ChatError> {
    arg.or_else(|| store.session().conv_key.clone())
        .ok_or(ChatError::NoConversation)
}

fn print_conversation_row(conv: &Conversation) {
    let status = if conv.ended {
        "ended".red().to_string()
    } else if conv.is_queued() {
        "queued".yellow().to_string()
    } else if conv.unread_count > 0 {
        format!("{} unread", conv.unread_count).bright_green().to_string()
    } else {
        "active".green().to_string()
    };
    println!(
        "{}  {} / {}  [{}]  {}",
        conv.conv_key.bright_cyan().bold(),
        conv.trainer_name,
        conv.associate_name,
        status,
        conv.start_time.dimmed()
    );
}

fn print_message(msg: &Message) {
    let sender = match msg.role {
        Role::Trainer => msg.sender_name.bright_blue().bold(),
        Role::Admin => msg.sender_name.bright_magenta().bold(),
        Role::Agent => msg.sender_name.bright_green().bold(),
        Role::System => msg.sender_name.bright_yellow(),
    };
    let ts = if msg.timestamp.is_empty() { "..." } else { &msg.timestamp };
    println!("{} {} ({}): {}", ts.dimmed(), sender, msg.role, msg.text);
}

use std::time::Duration;

use clap::Parser;
use gigi_chat::{ChatBackend, ChatConfig, ChatSession, EncryptionConfig, UserIdentity};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shared secret; enables message encryption when set
    #[arg(short, long)]
    password: Option<String>,

    /// Words masked in displayed messages
    #[arg(short, long, value_delimiter = ',')]
    blacklist: Vec<String>,

    /// Messages per history page
    #[arg(long, default_value = "5")]
    page_size: usize,

    /// Read Alice's messages from stdin instead of the scripted exchange
    #[arg(short, long)]
    interactive: bool,
}

const SCRIPT: &[(&str, &str)] = &[
    ("alice", "Hi Bob, lunch today?"),
    ("bob", "Sure! Somewhere that is not bad this time"),
    ("alice", "Noon at the usual place"),
    ("bob", "See you there"),
    ("alice", "Bringing the evil plan"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();

    let mut config = ChatConfig {
        page_size: args.page_size,
        ..ChatConfig::default()
    };
    if let Some(password) = &args.password {
        config = config.with_encryption(EncryptionConfig::new(password.clone(), "alice:bob"));
        println!("🔒 Encryption enabled");
    }
    config.validate()?;

    let backend = ChatBackend::in_memory();
    let alice = UserIdentity::new("alice", "Alice");
    let bob = UserIdentity::new("bob", "Bob");

    let mut alice_session =
        ChatSession::open(&backend, alice.clone(), vec![bob.clone()], None, config.clone())?
            .with_blacklist(&args.blacklist);

    // The conversation only exists after the first send
    alice_session.send_message("👋").await?;
    let conversation_id = alice_session.conversation_id().map(str::to_string);
    println!("Conversation: {}", conversation_id.as_deref().unwrap_or("-"));

    let mut bob_session = ChatSession::open(&backend, bob, vec![alice], conversation_id, config)?
        .with_blacklist(&args.blacklist);

    let inbox = bob_session.subscribe(|message| {
        println!("  [Bob sees] {}: {}", message.user.name, message.text);
    })?;
    let typing = bob_session.subscribe_typing(|members| {
        if !members.is_empty() {
            println!("  [Bob sees] {} typing...", members.join(", "));
        }
    })?;

    if args.interactive {
        println!("Type messages as Alice, empty line to finish:");
        let debouncer = alice_session.typing_debouncer()?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            debouncer.keystroke().await?;
            alice_session.send_message(line).await?;
            debouncer.stop().await?;
        }
    } else {
        for (sender, text) in SCRIPT {
            let session = if *sender == "alice" {
                &mut alice_session
            } else {
                &mut bob_session
            };
            session.set_typing(true).await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.send_message(text).await?;
            session.set_typing(false).await?;
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("Bob has {} unread messages", bob_session.unread_count().await?);
    bob_session.mark_read().await?;

    println!("\nHistory as Bob, newest first:");
    let mut page = bob_session.load_history().await?;
    loop {
        for message in &page.messages {
            println!(
                "  {} {}: {}",
                message.created_at.format("%H:%M:%S%.3f"),
                message.user.name,
                message.text
            );
        }
        if !page.has_more {
            break;
        }
        println!("  -- earlier --");
        page = bob_session.on_load_earlier().await?;
    }

    inbox.dispose();
    typing.dispose();
    Ok(())
}

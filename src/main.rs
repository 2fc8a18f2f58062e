use anyhow::{Context, Result};
use bedrock_client::BedrockClient;
use bedrock_config::ClientConfig;
use bedrock_conversation::ConversationManager;
use bedrock_core::{GenerationOverrides, Message, ResponseFormat};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bedrock-chat")]
#[command(about = "Chat with AWS Bedrock models with bounded conversation memory", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.bedrock-chat/config.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single prompt without conversation memory
    Ask {
        /// The prompt to send
        prompt: String,

        /// Optional system instruction
        #[arg(short, long)]
        system: Option<String>,

        /// Ask for a generic JSON response
        #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "schema")]
        json: bool,

        /// JSON Schema file the response must conform to
        #[arg(long, value_name = "FILE")]
        schema: Option<PathBuf>,

        #[arg(short, long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print the response as it is generated
        #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with_all = ["json", "schema"])]
        stream: bool,
    },

    /// Interactive conversation with summarizing memory
    Chat {
        /// System prompt for the conversation
        #[arg(short, long)]
        system: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let client = Arc::new(BedrockClient::new(config).await?);
    info!("Connected to Bedrock in region {}", client.get_region());

    match cli.command {
        Commands::Ask {
            prompt,
            system,
            json,
            schema,
            temperature,
            max_tokens,
            stream,
        } => {
            let mut overrides = GenerationOverrides::new();
            overrides.temperature = temperature;
            overrides.max_tokens = max_tokens;
            if let Some(path) = schema {
                overrides = overrides.with_response_format(load_schema(&path)?);
            } else if json {
                overrides = overrides.with_response_format(ResponseFormat::Json);
            }

            ask(&client, &prompt, system.as_deref(), overrides, stream).await?;
        }
        Commands::Chat { system } => {
            let conversation = client.create_conversation(system)?;
            interactive_chat(&conversation).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    if let Some(path) = path {
        info!("Loading configuration from: {:?}", path);
        return Ok(ClientConfig::from_yaml(path)?);
    }

    let default_path = ClientConfig::default_config_path();
    if default_path.exists() {
        info!("Loading configuration from: {:?}", default_path);
        Ok(ClientConfig::from_yaml(&default_path)?)
    } else {
        info!("Using default configuration");
        Ok(ClientConfig::default())
    }
}

fn load_schema(path: &Path) -> Result<ResponseFormat> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    let schema: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Schema file {} is not valid JSON", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("response")
        .to_string();
    Ok(ResponseFormat::schema(name, schema))
}

async fn ask(
    client: &BedrockClient,
    prompt: &str,
    system: Option<&str>,
    overrides: GenerationOverrides,
    stream: bool,
) -> Result<()> {
    if stream {
        let output = client
            .invoke_model_with_streaming(prompt, system, overrides, |chunk| {
                print!("{chunk}");
                io::stdout().flush().ok();
            })
            .await?;
        println!();

        if let Some(usage) = output.usage {
            println!("\n(Tokens: {} in / {} out)", usage.input_tokens, usage.output_tokens);
        }
    } else {
        let response = client.invoke_model(prompt, system, overrides).await?;
        println!("{response}");
    }
    Ok(())
}

async fn interactive_chat(conversation: &ConversationManager) -> Result<()> {
    println!("Bedrock Chat ({})", conversation.config().defaults.model_id);
    println!("Commands: /history /full /summary /stats /clear /export <file>");
    println!("Type 'exit' or 'quit' to end the conversation");
    println!("═══════════════════════════════════════\n");

    loop {
        print!("You> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        if let Some(command) = input.strip_prefix('/') {
            run_command(conversation, command).await?;
            continue;
        }

        match conversation.send(input).await {
            Ok(response) => println!("\nAssistant> {response}\n"),
            Err(e) => println!("\nError: {e}\n"),
        }
    }

    Ok(())
}

async fn run_command(conversation: &ConversationManager, command: &str) -> Result<()> {
    let (name, argument) = match command.split_once(' ') {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    match name {
        "history" => print_messages("Active window", &conversation.history()),
        "full" => print_messages("Full history", &conversation.full_history()),
        "summary" => match conversation.summary() {
            Some(summary) => println!("\n{}\n", summary.content()),
            None => println!("\n(no summary yet)\n"),
        },
        "stats" => {
            let metadata = conversation.metadata();
            println!("\nConversation {}", metadata.id);
            println!("  Turns: {}", metadata.turn_count);
            println!("  Messages recorded: {}", metadata.message_count);
            println!("  Summarizations: {} ({} failed)", metadata.summarization_count, metadata.failed_summarizations);
            println!("  Tokens: {} in / {} out\n", metadata.token_usage.input_tokens, metadata.token_usage.output_tokens);
        }
        "clear" => {
            conversation.clear().await;
            println!("\nActive memory cleared.\n");
        }
        "export" if !argument.is_empty() => match conversation.snapshot().export(argument) {
            Ok(()) => println!("\nExported conversation to {argument}\n"),
            Err(e) => println!("\nExport failed: {e}\n"),
        },
        "export" => println!("\nUsage: /export <file>\n"),
        other => println!("\nUnknown command: /{other}\n"),
    }
    Ok(())
}

fn print_messages(title: &str, messages: &[Message]) {
    println!("\n{title} ({} messages)", messages.len());
    for message in messages {
        println!(
            "[{} #{} {}] {}",
            message.role(),
            message.sequence_number(),
            message.timestamp().format("%H:%M:%S"),
            message.content()
        );
    }
    println!();
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

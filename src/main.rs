use anyhow::anyhow;
use clap::{Parser, Subcommand};
use parley::{AppResult, AppState, config::Config, db::Stores, messages::Message, search::MessageIndex};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "parley", about = "Maintenance for the conversation and message stores")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring both stores up to the current schema.
    Migrate,
    /// Rebuild the search index from the entity store.
    Reindex,
    /// Everything a person can read, newest first.
    Inbox {
        #[arg(long = "as")]
        handle: String,
    },
    /// Full-text search. With --as, only that person's conversations.
    Search {
        query: String,
        #[arg(long = "as")]
        handle: Option<String>,
    },
}

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Migrate => {
            Stores::connect(&config).await?.migrate().await?;
        }
        Command::Reindex => {
            let stores = Stores::connect(&config).await?;
            stores.migrate().await?;
            let count = MessageIndex::new(stores.index.clone()).rebuild(&stores.primary).await?;
            println!("{count} messages indexed");
        }
        Command::Inbox { handle } => {
            let (state, _worker) = AppState::open(&config).await?;
            let actor = person(&state, &handle).await?;
            let messages = state.messages().find_all(&actor).await?;
            print_messages(&state, &messages).await?;
        }
        Command::Search { query, handle } => {
            let (state, _worker) = AppState::open(&config).await?;
            let messages = match handle {
                Some(handle) => {
                    let actor = person(&state, &handle).await?;
                    state.messages().search_visible(&actor, &query).await?
                }
                None => state.index.index().search(&query).await?,
            };
            print_messages(&state, &messages).await?;
        }
    }

    Ok(())
}

async fn person(state: &AppState, handle: &str) -> AppResult<parley::people::Person> {
    Ok(state
        .people()
        .find_by_handle(handle)
        .await?
        .ok_or_else(|| anyhow!("no person with handle {handle}"))?)
}

async fn print_messages(state: &AppState, messages: &[Message]) -> AppResult<()> {
    let service = state.messages();
    let mut dtos = Vec::with_capacity(messages.len());
    for message in messages {
        dtos.push(service.to_dto(message).await?);
    }
    println!("{}", serde_json::to_string_pretty(&dtos)?);
    Ok(())
}

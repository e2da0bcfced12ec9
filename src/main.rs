use std::fs::File;
use std::sync::Arc;

use tracing::{error, info, info_span, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use database::PgDatabase;
use matchmaking::Matchmaker;
use poise::{serenity_prelude as serenity, CreateReply};

use commands::{
    moderator_commands::ModeratorCommands, settings_commands::SettingsCommands,
    user_commands::UserCommands, CommandsContainer,
};

/// All the commands that the bot can run.
///
/// Additionally, it contains the `CommandsContainer` trait that groups all the commands together
/// as well as checks used by various commands.
mod commands;
/// Traits and types used for interacting with the database.
mod database;
/// Handlers for button presses and member role updates.
mod event_handler;
/// Contains functions for logging and posting match results.
mod log;
/// The matchmaking core: queues, match formation, ranks and scoring.
mod matchmaking;

mod utils;

/// Stores data used by the bot.
///
/// Accessible by all bot commands through Context.
#[derive(Debug, Clone)]
pub struct Data<DB> {
    database: DB,
    matchmaker: Arc<Matchmaker>,
}

impl<DB> Data<DB> {
    fn new(database: DB) -> Self {
        Self {
            database,
            matchmaker: Arc::new(Matchmaker::new()),
        }
    }
}

/// Convenience type for the bot's data with generics filled in.
pub type BotData = Data<PgDatabase>;

/// A thread-safe Error type used by the bot.
pub type BotError = anyhow::Error;

/// A context that gives the bot information about the action that invoked it.
///
/// It also includes other useful data that the bot uses such as the database.
/// You can access the data in commands by using ``ctx.data()``.
pub type BotContext<'a> = poise::Context<'a, BotData, BotError>;

#[tokio::main]
async fn main() {
    if let Err(e) = setup_tracing() {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run().await {
        panic!("Error trying to run the bot: {}", e);
    }
}

/// The main function that runs the bot.
async fn run() -> Result<(), BotError> {
    let setup_span = info_span!("bot_setup");
    let _guard = setup_span.enter();
    // Load the .env file only in the development environment (bypassed with the --release flag)
    #[cfg(debug_assertions)]
    dotenv::dotenv().ok();

    let discord_token =
        std::env::var("DISCORD_TOKEN").expect("Expected DISCORD_TOKEN as an environment variable");
    info!("Successfully loaded Discord Token");

    let pg_database = PgDatabase::connect().await?;
    pg_database.migrate().await?;
    info!("Successfully connected to the database");

    let commands: Vec<_> = vec![
        UserCommands::get_all(),
        ModeratorCommands::get_all(),
        SettingsCommands::get_all(),
    ]
    .into_iter()
    .flatten()
    .collect();
    commands.iter().for_each(|c| info!("Command: {}", c.name));

    // GUILD_MEMBERS is needed to see role changes for role-bound queues.
    let intents = serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands,
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler::event_handler(ctx, event, framework, data))
            },
            on_error: |err| {
                Box::pin(async move {
                    let message = match err {
                        poise::FrameworkError::NotAnOwner { .. } => return,
                        poise::FrameworkError::GuildOnly { .. } => return,
                        poise::FrameworkError::UnknownCommand { .. } => return,
                        poise::FrameworkError::CommandCheckFailed { ref error, .. } => {
                            match error {
                                Some(error) => format!("{}", error),
                                None => return,
                            }
                        }
                        poise::FrameworkError::Command { ref error, .. } => format!("{}", error),
                        poise::FrameworkError::ArgumentParse { ref error, .. } => {
                            format!("{}", error)
                        }
                        _ => "Something went wrong. Please let the bot maintainers know if the issue persists.".to_string(),
                    };
                    error!("Error in command: {:?}", err);
                    let Some(ctx) = err.ctx() else {
                        return;
                    };
                    if let Err(e) = ctx
                        .send(CreateReply::default().content(message).ephemeral(true))
                        .await
                    {
                        error!("Error sending error message to user: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Ready as {}", ready.user.name);
                Ok(Data::new(pg_database))
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(discord_token, intents)
        .framework(framework)
        .await?;

    client.start().await?;

    Ok(())
}

/// Sets up the tracing subscriber for the bot.
fn setup_tracing() -> Result<(), BotError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("stattrack=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("debug.log")?;

    // Only errors get logged in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}

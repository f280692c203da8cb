mod chatbot;
mod config;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use chatbot::commands::FAILURE_REPLY;
use chatbot::telegram::{BotIdentity, addresses_bot, destination, to_inbound};
use chatbot::{
    AnswerSource, AppContext, ChatHistory, Command, FileBackup, GeminiClient, Responder,
    SharedContext, SpeechDelivery, TelegramClient, VoiceVoxClient, VoiceVoxConfig, handle_command,
};
use config::Config;

fn build_context(config: &Config, bot: &Bot, bot_name: String) -> Result<AppContext, chatbot::Error> {
    let gemini = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        config.system_prompt.clone(),
    )?);
    let telegram = Arc::new(TelegramClient::new(bot.clone()));
    let history = Arc::new(ChatHistory::new(config.latest_n_history));
    let voice_config = Arc::new(RwLock::new(VoiceVoxConfig::load(&config.voicevox_config_path)?));

    let responder = Responder::new(gemini, telegram.clone(), history, bot_name);
    let speech = SpeechDelivery::new(
        Arc::new(VoiceVoxClient::new(&config.voicevox_host)),
        telegram,
        Arc::new(FileBackup::new(&config.backup_dir)),
        config.backup,
        voice_config,
        config.voicevox_speaker,
    );

    Ok(AppContext::new(
        responder,
        speech,
        config.voicevox_config_path.clone(),
        config.system_prompt.clone().unwrap_or_default(),
    ))
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "voxbridge.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("voxbridge.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting voxbridge...");
    info!("Loaded config from {config_path}");

    let bot = Bot::new(&config.telegram_bot_token);

    let bot_name = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            me.username().to_string()
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            "voxbridge".to_string()
        }
    };

    let ctx: SharedContext = match build_context(&config, &bot, bot_name) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to start: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register commands: {e}");
    }

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// Answer plain messages addressed to the bot, or every message while
/// listening to all. The rest are kept as context.
async fn handle_message(bot: Bot, msg: Message, me: Me, ctx: SharedContext) -> ResponseResult<()> {
    let identity = BotIdentity::from_me(&me);
    let inbound = to_inbound(&msg, &identity);

    let from_bot = msg.from.as_ref().is_some_and(|u| u.is_bot);
    if !ctx.should_answer(from_bot, addresses_bot(&msg, &identity)) {
        ctx.responder.record(&inbound).await;
        return Ok(());
    }

    let preview: String = inbound.content.chars().take(50).collect();
    info!("📨 {} ({}): \"{}\"", inbound.author.display_name, inbound.author.id, preview);

    let result = match ctx.responder.get_answer(AnswerSource::Message(&inbound), true).await {
        Ok(answer) => {
            ctx.speech
                .deliver(
                    &destination(&msg, inbound.origin.scope_id()),
                    &answer,
                    false,
                    Some(&inbound.author),
                )
                .await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!("Answer failed: {e}");
        bot.send_message(msg.chat.id, FAILURE_REPLY).await?;
    }

    Ok(())
}

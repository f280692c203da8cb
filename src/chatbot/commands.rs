//! Slash commands.

use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::chatbot::context::{HISTORY_LENGTH_RANGE, SharedContext};
use crate::chatbot::gemini::is_valid_model_name;
use crate::chatbot::message::{Origin, truncate_chars};
use crate::chatbot::preprocessor::collect_images;
use crate::chatbot::responder::AnswerSource;
use crate::chatbot::speech::MAX_REPLY_CHARS;
use crate::chatbot::telegram::{BotIdentity, command_author, destination, to_inbound};
use crate::chatbot::voice_config::{VoiceVoxKey, parse_value};

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum Command {
    #[command(description = "show this help")]
    Help,
    #[command(description = "ask any question")]
    Q(String),
    #[command(description = "ask any question (alias of /q)")]
    Ask(String),
    #[command(description = "ask a question and get the answer as audio")]
    Voice(String),
    #[command(description = "reply to an image to get a description")]
    Imginfo(String),
    #[command(description = "fix grammar, spelling and phrasing")]
    FixGrammar(String),
    #[command(description = "change the VOICEVOX speaker id")]
    ChangeSpeaker(i64),
    #[command(description = "replace the system prompt")]
    ChangeSystemPrompt(String),
    #[command(description = "set how many exchanges are remembered (1-50)")]
    HistoryLength(usize),
    #[command(description = "forget this chat's history")]
    ClearHistory,
    #[command(description = "voice parameters: show | set <key> <value> | reset | save")]
    VoiceConfig(String),
    #[command(description = "go back to the configured speaker")]
    ResetSpeaker,
    #[command(description = "go back to the configured system prompt")]
    ResetSystemPrompt,
    #[command(description = "switch the Gemini model, e.g. gemini-2.5-flash")]
    ChangeGeminiModel(String),
    #[command(description = "toggle mentioning the asker in answers")]
    ToggleMention,
    #[command(description = "toggle answering every message instead of only mentions")]
    ToggleListen,
    #[command(description = "toggle saving generated audio")]
    ToggleBackupAudio,
    #[command(description = "toggle saving generated text")]
    ToggleBackupText,
    #[command(description = "reset history, system prompt, voice parameters, speaker and toggles")]
    ResetAll,
}

/// Posted when answering fails. Error details stay in the log.
pub const FAILURE_REPLY: &str = "Sorry, I couldn't answer that right now.";

fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

/// Parsed `/voice_config` argument.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceConfigAction {
    Show,
    Set(String, serde_json::Value),
    Reset,
    Save,
}

impl VoiceConfigAction {
    pub fn parse(args: &str) -> Result<Self, String> {
        let mut words = args.split_whitespace();
        match words.next() {
            None | Some("show") => Ok(Self::Show),
            Some("reset") => Ok(Self::Reset),
            Some("save") => Ok(Self::Save),
            Some("set") => {
                let (Some(key), Some(raw), None) = (words.next(), words.next(), words.next()) else {
                    return Err("Usage: /voice_config set <key> <value>".to_string());
                };
                let value = parse_value(raw)
                    .ok_or_else(|| format!("Value must be a number, true/false or null, got {raw}"))?;
                Ok(Self::Set(key.to_string(), value))
            }
            Some(other) => Err(format!("Unknown action {other}. Use show, set, reset or save.")),
        }
    }
}

pub fn validate_history_length(n: usize) -> Result<usize, String> {
    if HISTORY_LENGTH_RANGE.contains(&n) {
        Ok(n)
    } else {
        Err(format!(
            "History length must be between {} and {}.",
            HISTORY_LENGTH_RANGE.start(),
            HISTORY_LENGTH_RANGE.end()
        ))
    }
}

async fn reply(bot: &Bot, msg: &Message, text: &str) -> ResponseResult<()> {
    bot.send_message(msg.chat.id, truncate_chars(text, MAX_REPLY_CHARS))
        .reply_parameters(teloxide::types::ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

/// Answer a question from a command argument and speak it.
async fn answer_command(
    bot: &Bot,
    msg: &Message,
    ctx: &SharedContext,
    origin: &Origin,
    text: &str,
    attach_audio: bool,
) -> ResponseResult<()> {
    if text.trim().is_empty() {
        return reply(bot, msg, "Please include a question.").await;
    }

    let author = command_author(msg);
    let source = AnswerSource::Command {
        origin,
        author: &author,
        text,
    };
    let result = match ctx.responder.get_answer(source, true).await {
        Ok(answer) => {
            ctx.speech
                .deliver(&destination(msg, origin.scope_id()), &answer, attach_audio, Some(&author))
                .await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!("Answer failed: {e}");
        reply(bot, msg, FAILURE_REPLY).await?;
    }
    Ok(())
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    me: Me,
    ctx: SharedContext,
) -> ResponseResult<()> {
    let inbound = to_inbound(&msg, &BotIdentity::from_me(&me));
    let origin = inbound.origin.clone();
    info!("⌨️ {:?} from {} in {}", cmd, inbound.author.display_name, origin.scope_name());

    match cmd {
        Command::Help => {
            reply(&bot, &msg, &Command::descriptions().to_string()).await?;
        }
        Command::Q(text) | Command::Ask(text) => {
            answer_command(&bot, &msg, &ctx, &origin, &text, false).await?;
        }
        Command::Voice(text) => {
            answer_command(&bot, &msg, &ctx, &origin, &text, true).await?;
        }
        Command::Imginfo(text) => {
            let images = collect_images(&inbound);
            if images.is_empty() {
                return reply(&bot, &msg, "Please reply to an image (or attach one).").await;
            }
            let result = match ctx.responder.describe(&images, &text).await {
                Ok(answer) => {
                    ctx.speech
                        .deliver(
                            &destination(&msg, origin.scope_id()),
                            &answer,
                            false,
                            Some(&inbound.author),
                        )
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Image description failed: {e}");
                reply(&bot, &msg, FAILURE_REPLY).await?;
            }
        }
        Command::FixGrammar(text) => match ctx.responder.fix_grammar(&text).await {
            Ok(fixed) => reply(&bot, &msg, &fixed).await?,
            Err(e) => {
                warn!("Grammar fix failed: {e}");
                reply(&bot, &msg, FAILURE_REPLY).await?;
            }
        },
        Command::ChangeSpeaker(speaker) => {
            ctx.speech.set_speaker(speaker);
            reply(&bot, &msg, &format!("VoiceVox speaker changed to {speaker}.")).await?;
        }
        Command::ChangeSystemPrompt(prompt) => {
            ctx.responder.set_system_prompt(prompt.clone());
            reply(&bot, &msg, &format!("✅ System prompt updated.\nNew prompt:\n{prompt}")).await?;
        }
        Command::HistoryLength(n) => match validate_history_length(n) {
            Ok(n) => {
                ctx.history().set_latest_n(n);
                let kept = ctx.history().latest_n();
                reply(&bot, &msg, &format!("Keeping the last {kept} exchanges.")).await?;
            }
            Err(e) => reply(&bot, &msg, &e).await?,
        },
        Command::ClearHistory => {
            ctx.history().clear(origin.scope_id()).await;
            reply(&bot, &msg, "History cleared.").await?;
        }
        Command::VoiceConfig(args) => {
            let text = match VoiceConfigAction::parse(&args) {
                Ok(action) => run_voice_config(&ctx, action).await,
                Err(e) => e,
            };
            reply(&bot, &msg, &text).await?;
        }
        Command::ResetSpeaker => {
            let speaker = ctx.speech.reset_speaker();
            reply(&bot, &msg, &format!("VoiceVox speaker reset to default ({speaker}).")).await?;
        }
        Command::ResetSystemPrompt => {
            ctx.reset_system_prompt();
            reply(&bot, &msg, "System prompt has been reset to the default.").await?;
        }
        Command::ChangeGeminiModel(model) => {
            let model = model.trim();
            if is_valid_model_name(model) {
                ctx.responder.set_model(model.to_string());
                reply(&bot, &msg, &format!("Gemini model changed to {model}.")).await?;
            } else {
                reply(&bot, &msg, "Usage: /change_gemini_model <model id>").await?;
            }
        }
        Command::ToggleMention => {
            let text = if ctx.speech.toggle_mention() {
                "AI will now mention users."
            } else {
                "AI will now not mention users."
            };
            reply(&bot, &msg, text).await?;
        }
        Command::ToggleListen => {
            let text = if ctx.toggle_listen() {
                "AI will now listen to all messages."
            } else {
                "AI will now listen to only mentions."
            };
            reply(&bot, &msg, text).await?;
        }
        Command::ToggleBackupAudio => {
            let state = on_off(ctx.speech.toggle_backup_audio());
            reply(&bot, &msg, &format!("Audio backup is now {state}.")).await?;
        }
        Command::ToggleBackupText => {
            let state = on_off(ctx.speech.toggle_backup_text());
            reply(&bot, &msg, &format!("Text backup is now {state}.")).await?;
        }
        Command::ResetAll => {
            let text = match ctx.reset_all(origin.scope_id()).await {
                Ok(()) => "All settings have been reset: chat history, system prompt, voice parameters, speaker and toggles.".to_string(),
                Err(e) => {
                    warn!("Reset failed: {e}");
                    format!("Failed: {e}")
                }
            };
            reply(&bot, &msg, &text).await?;
        }
    }

    Ok(())
}

async fn run_voice_config(ctx: &SharedContext, action: VoiceConfigAction) -> String {
    let result = match action {
        VoiceConfigAction::Show => {
            let config = ctx.speech.voice_config().read().await;
            Ok(VoiceVoxKey::ALL
                .iter()
                .map(|key| format!("{key}: {}", config.get(*key)))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        VoiceConfigAction::Set(key, value) => {
            let shown = value.to_string();
            ctx.update_voice_config(|config| config.set(&key, value))
                .await
                .map(|()| format!("{key} set to {shown}."))
        }
        VoiceConfigAction::Reset => ctx
            .update_voice_config(|config| {
                config.reset();
                Ok(())
            })
            .await
            .map(|()| "Voice parameters reset to defaults.".to_string()),
        VoiceConfigAction::Save => {
            let config = ctx.speech.voice_config().read().await;
            config
                .save(&ctx.voice_config_path)
                .map(|()| "Voice parameters saved.".to_string())
        }
    };

    result.unwrap_or_else(|e| {
        warn!("Voice config command failed: {e}");
        format!("Failed: {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("/q what's up?", "voxbridge_bot").unwrap(),
            Command::Q("what's up?".to_string())
        );
        assert_eq!(
            Command::parse("/fix_grammar i has a pen", "voxbridge_bot").unwrap(),
            Command::FixGrammar("i has a pen".to_string())
        );
        assert_eq!(
            Command::parse("/change_speaker 3", "voxbridge_bot").unwrap(),
            Command::ChangeSpeaker(3)
        );
        assert_eq!(
            Command::parse("/history_length@voxbridge_bot 5", "voxbridge_bot").unwrap(),
            Command::HistoryLength(5)
        );
        assert!(Command::parse("/change_speaker abc", "voxbridge_bot").is_err());
        assert_eq!(
            Command::parse("/change_gemini_model gemini-2.5-flash", "voxbridge_bot").unwrap(),
            Command::ChangeGeminiModel("gemini-2.5-flash".to_string())
        );
        assert_eq!(
            Command::parse("/toggle_listen", "voxbridge_bot").unwrap(),
            Command::ToggleListen
        );
        assert_eq!(
            Command::parse("/toggle_backup_audio", "voxbridge_bot").unwrap(),
            Command::ToggleBackupAudio
        );
        assert_eq!(
            Command::parse("/reset_all", "voxbridge_bot").unwrap(),
            Command::ResetAll
        );
    }

    #[test]
    fn test_on_off() {
        assert_eq!(on_off(true), "enabled");
        assert_eq!(on_off(false), "disabled");
    }

    #[test]
    fn test_history_length_bounds() {
        assert_eq!(validate_history_length(1), Ok(1));
        assert_eq!(validate_history_length(50), Ok(50));
        assert!(validate_history_length(0).is_err());
        assert!(validate_history_length(51).is_err());
    }

    #[test]
    fn test_voice_config_action() {
        assert_eq!(VoiceConfigAction::parse(""), Ok(VoiceConfigAction::Show));
        assert_eq!(VoiceConfigAction::parse("reset"), Ok(VoiceConfigAction::Reset));
        assert_eq!(VoiceConfigAction::parse(" save "), Ok(VoiceConfigAction::Save));
        assert_eq!(
            VoiceConfigAction::parse("set speedScale 1.2"),
            Ok(VoiceConfigAction::Set("speedScale".to_string(), json!(1.2)))
        );
        assert_eq!(
            VoiceConfigAction::parse("set pauseLength null"),
            Ok(VoiceConfigAction::Set("pauseLength".to_string(), serde_json::Value::Null))
        );
        assert!(VoiceConfigAction::parse("set speedScale").is_err());
        assert!(VoiceConfigAction::parse("set speedScale fast").is_err());
        assert!(VoiceConfigAction::parse("louder").is_err());
    }
}

//! Configuration validation utilities.

use sibyl_framework::RuleSet;
use sibyl_framework::command::command_key;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, LogOutput, LoggingConfig, ProtocolConfig, SchedulerConfig, SibylConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &SibylConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_logging_config(&config.logging)?;
    validate_scheduler_config(&config.scheduler)?;
    RuleSet::parse(&config.permissions.rules)?;
    validate_overlay_names(config)?;
    for (name, protocol) in &config.protocols {
        validate_protocol_config(name, protocol)?;
    }
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.nick.trim().is_empty() {
        return Err(ConfigError::missing_field("bot.nick"));
    }
    if let Some(prefix) = &bot.cmd_prefix
        && prefix.chars().any(char::is_whitespace)
    {
        return Err(ConfigError::validation(format!(
            "Command prefix '{prefix}' must not contain whitespace"
        )));
    }
    if bot.alias_depth == 0 {
        return Err(ConfigError::validation("bot.alias_depth must be at least 1"));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    #[cfg(not(feature = "json-log"))]
    if logging.format == super::schema::LogFormat::Json {
        return Err(ConfigError::validation(
            "JSON log format requires the 'json-log' feature",
        ));
    }
    Ok(())
}

fn validate_scheduler_config(scheduler: &SchedulerConfig) -> ConfigResult<()> {
    if scheduler.poll_ms == 0 {
        return Err(ConfigError::validation("scheduler.poll_ms must be greater than 0"));
    }
    if scheduler.tick_ms == 0 {
        return Err(ConfigError::validation("scheduler.tick_ms must be greater than 0"));
    }
    if scheduler.max_overruns == 0 {
        return Err(ConfigError::validation(
            "scheduler.max_overruns must be greater than 0",
        ));
    }
    Ok(())
}

/// Aliases, triggers and renames must use valid command names.
fn validate_overlay_names(config: &SibylConfig) -> ConfigResult<()> {
    let names = config
        .aliases
        .keys()
        .chain(config.triggers.keys())
        .chain(config.renames.keys())
        .chain(config.renames.values());
    for name in names {
        command_key(name).map_err(|e| ConfigError::validation(e.to_string()))?;
    }
    Ok(())
}

fn validate_protocol_config(name: &str, protocol: &ProtocolConfig) -> ConfigResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::validation(format!("Invalid protocol name '{name}'")));
    }
    if protocol.reconnect_wait_secs == 0 {
        return Err(ConfigError::validation(format!(
            "protocols.{name}.reconnect_wait_secs must be greater than 0"
        )));
    }
    if protocol.process_timeout_ms == 0 {
        return Err(ConfigError::validation(format!(
            "protocols.{name}.process_timeout_ms must be greater than 0"
        )));
    }
    if protocol.rooms.iter().any(|r| r.name.trim().is_empty()) {
        return Err(ConfigError::missing_field(format!("protocols.{name}.rooms.name")));
    }
    if !protocol.settings.is_object() && !protocol.settings.is_null() {
        return Err(ConfigError::protocol_settings(name, "settings must be a table"));
    }
    Ok(())
}

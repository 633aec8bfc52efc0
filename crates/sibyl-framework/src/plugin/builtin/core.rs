//! The `core` plugin: help, name lookup and overlay management.
//!
//! | Command | Usage |
//! |---------|-------|
//! | `help` | `help [command]` |
//! | `which` | `which <command>` |
//! | `alias` | `alias add <name> <command line...>`, `alias del <name>`, `alias list` |
//! | `trigger` | `trigger add <name> <reply...>`, `trigger del <name>`, `trigger list` |
//! | `die` | `die [reason...]` (elevated control) |
//!
//! Overlay changes are validated against the registry here and then applied
//! by the main loop, which also persists them.

use std::sync::Arc;

use sibyl_core::Message;
use tower::BoxError;

use crate::bot::{Bot, ControlRequest};
use crate::command::{ALIAS_NAMESPACE, CommandTarget, TRIGGER_NAMESPACE, command_key, join_args};
use crate::define_plugin;
use crate::error::RegistryError;
use crate::plugin::{PluginDescriptor, command};

pub static CORE_PLUGIN: PluginDescriptor = define_plugin! {
    /// Help, command lookup, aliases and triggers.
    name: "core",
    items: [
        command("help", help),
        command("which", which),
        command("alias", alias),
        command("trigger", trigger),
        command("die", die).ctrl(),
    ],
};

async fn help(bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
    match args.first() {
        None => {
            let names: Vec<String> = bot.commands().into_iter().map(|c| c.name).collect();
            format!("Available commands: {}", names.join(", "))
        }
        Some(name) => {
            let registry = bot.registry().read();
            match registry.resolve(name).map(|e| (e.namespace().to_string(), e.target().clone())) {
                None => format!("\"{name}\" is not a command"),
                Some((_, CommandTarget::Alias(template))) => format!("{name}: alias for \"{template}\""),
                Some((_, CommandTarget::Trigger(_))) => format!("{name}: trigger"),
                Some((ns, CommandTarget::Handler(_))) => format!("{name}: provided by plugin \"{ns}\""),
            }
        }
    }
}

async fn which(bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
    let Some(name) = args.first() else {
        return "Usage: which <command>".to_string();
    };
    match bot.which(name) {
        Some(ns) => format!("\"{name}\" is defined by \"{ns}\""),
        None => format!("\"{name}\" is not defined"),
    }
}

async fn alias(bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> Result<String, BoxError> {
    overlay_command(&bot, ALIAS_NAMESPACE, &args)
}

async fn trigger(bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> Result<String, BoxError> {
    overlay_command(&bot, TRIGGER_NAMESPACE, &args)
}

async fn die(bot: Bot, msg: Arc<Message>, args: Vec<String>) -> Result<&'static str, BoxError> {
    let reason = if args.is_empty() {
        format!("requested by {}", msg.user())
    } else {
        args.join(" ")
    };
    bot.shutdown(reason)?;
    Ok("Shutting down")
}

/// Shared implementation of `alias` and `trigger`.
fn overlay_command(bot: &Bot, namespace: &str, args: &[String]) -> Result<String, BoxError> {
    let usage = || format!("Usage: {namespace} add <name> <text...> | {namespace} del <name> | {namespace} list");
    let (action, rest) = match args.split_first() {
        Some((action, rest)) => (action.to_lowercase(), rest),
        None => return Ok(usage()),
    };

    match (action.as_str(), rest) {
        ("list", _) => {
            let overlay = bot.registry().read().overlay();
            let (entries, plural) = if namespace == ALIAS_NAMESPACE {
                (overlay.aliases, "aliases")
            } else {
                (overlay.triggers, "triggers")
            };
            if entries.is_empty() {
                return Ok(format!("No {plural} defined"));
            }
            let lines: Vec<String> = entries.iter().map(|(k, v)| format!("{k} = {v}")).collect();
            Ok(lines.join("\n"))
        }
        ("add", [name, text @ ..]) if !text.is_empty() => {
            command_key(name)?;
            if let Some(owner) = bot.which(name) {
                return Err(RegistryError::DuplicateName {
                    name: name.clone(),
                    owner,
                }
                .into());
            }
            let text = join_args(text);
            let request = if namespace == ALIAS_NAMESPACE {
                ControlRequest::AddAlias {
                    name: name.clone(),
                    template: text,
                }
            } else {
                ControlRequest::AddTrigger {
                    name: name.clone(),
                    reply: text,
                }
            };
            bot.request(request)?;
            Ok(format!("{namespace} \"{name}\" added"))
        }
        ("del", [name]) => {
            match bot.which(name) {
                Some(owner) if owner == namespace => {}
                Some(owner) => return Ok(format!("\"{name}\" belongs to \"{owner}\", not to {namespace}")),
                None => return Ok(format!("No {namespace} named \"{name}\"")),
            }
            bot.request(ControlRequest::RemoveOverlay { name: name.clone() })?;
            Ok(format!("{namespace} \"{name}\" removed"))
        }
        _ => Ok(usage()),
    }
}

#[cfg(test)]
mod tests {
    use sibyl_core::{User, UserKind};

    use super::*;
    use crate::bot::testing::test_bot;
    use crate::manager::PluginManager;

    fn msg() -> Arc<Message> {
        Arc::new(Message::private(User::new("cli", "admin", UserKind::Private), ""))
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_help_lists_and_explains() {
        let (bot, _rx) = test_bot();
        let mut mgr = PluginManager::new(bot.clone());
        mgr.register_plugin(CORE_PLUGIN).unwrap();
        bot.registry().write().add_alias("h", "help").unwrap();

        let listing = help(bot.clone(), msg(), vec![]).await;
        assert_eq!(
            listing,
            "Available commands: alias, die, h, help, trigger, which"
        );
        assert_eq!(
            help(bot.clone(), msg(), args(&["WHICH"])).await,
            "WHICH: provided by plugin \"core\""
        );
        assert_eq!(help(bot.clone(), msg(), args(&["h"])).await, "h: alias for \"help\"");
        assert_eq!(which(bot, msg(), args(&["nope"])).await, "\"nope\" is not defined");
    }

    #[tokio::test]
    async fn test_alias_add_goes_through_control_queue() {
        let (bot, mut rx) = test_bot();
        let mut mgr = PluginManager::new(bot.clone());
        mgr.register_plugin(CORE_PLUGIN).unwrap();

        let reply = alias(bot.clone(), msg(), args(&["add", "greet", "echo", "hello world"]))
            .await
            .unwrap();
        assert_eq!(reply, "alias \"greet\" added");
        assert_eq!(
            rx.control.try_recv().unwrap(),
            ControlRequest::AddAlias {
                name: "greet".into(),
                template: "echo \"hello world\"".into()
            }
        );

        let err = alias(bot.clone(), msg(), args(&["add", "help", "echo"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already defined by 'core'"));
        assert!(alias(bot.clone(), msg(), args(&["add", "bad-name", "echo"])).await.is_err());

        let reply = alias(bot, msg(), args(&["del", "help"])).await.unwrap();
        assert_eq!(reply, "\"help\" belongs to \"core\", not to alias");
        assert!(rx.control.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_list() {
        let (bot, _rx) = test_bot();
        assert_eq!(
            trigger(bot.clone(), msg(), args(&["list"])).await.unwrap(),
            "No triggers defined"
        );
        bot.registry().write().add_trigger("hi", "hello").unwrap();
        assert_eq!(
            trigger(bot, msg(), args(&["list"])).await.unwrap(),
            "hi = hello"
        );
    }

    #[tokio::test]
    async fn test_die_requests_shutdown() {
        let (bot, mut rx) = test_bot();
        assert_eq!(die(bot, msg(), args(&["maintenance"])).await.unwrap(), "Shutting down");
        assert_eq!(
            rx.control.try_recv().unwrap(),
            ControlRequest::Shutdown {
                reason: "maintenance".into()
            }
        );
    }
}

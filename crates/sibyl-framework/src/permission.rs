//! Black/white-list permission rules.
//!
//! A rule is one line of three whitespace-separated fields:
//!
//! ```text
//! <allow|deny> <subject> <command>
//! ```
//!
//! | Field | Forms |
//! |-------|-------|
//! | polarity | `allow` / `white` / `w`, `deny` / `black` / `b` |
//! | subject | `*`, `<protocol>`, `[<protocol>:]user:<id>`, `[<protocol>:]room:<name>` |
//! | command | `*`, `<plugin>.*`, `<plugin>.<command>`, `<command>` |
//!
//! Omitted trailing fields match everything. Rules are parsed and checked
//! when the configuration is loaded; evaluation assumes well-formed rules.
//!
//! Evaluation walks the whole list and the **last** applicable rule decides.
//! Later lines therefore override earlier ones, so a catch-all `allow * *`
//! followed by `deny user:alice *` blocks alice only. Admin protocols bypass
//! the list entirely. With no applicable rule the answer is allow.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use sibyl_core::{Room, User};

use crate::command::command_key;
use crate::error::RuleParseError;

/// Outcome of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectMatcher {
    Any,
    Protocol(String),
    User { protocol: Option<String>, id: String },
    Room { protocol: Option<String>, name: String },
}

/// Which commands a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMatcher {
    Any,
    Plugin(String),
    Command { plugin: Option<String>, name: String },
}

/// A parsed permission rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub verdict: Verdict,
    pub subject: SubjectMatcher,
    pub command: CommandMatcher,
    source: String,
}

impl Rule {
    /// The rule text as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// The outcome of [`RuleSet::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// The rule that decided, if any applied.
    pub rule: Option<Rule>,
    /// Set when an admin protocol short-circuited evaluation.
    pub admin: bool,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

// ============================================================================
// Parsing
// ============================================================================

impl FromStr for Rule {
    type Err = RuleParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| RuleParseError::new(line, reason);
        let mut fields = line.split_whitespace();

        let verdict = match fields.next().map(str::to_ascii_lowercase).as_deref() {
            Some("allow" | "white" | "w") => Verdict::Allow,
            Some("deny" | "black" | "b") => Verdict::Deny,
            Some(_) => return Err(err("polarity must be allow or deny")),
            None => return Err(err("empty rule")),
        };
        let subject = parse_subject(fields.next().unwrap_or("")).map_err(|r| err(&r))?;
        let command = parse_command(fields.next().unwrap_or("")).map_err(|r| err(&r))?;
        if fields.next().is_some() {
            return Err(err("too many fields"));
        }

        Ok(Rule {
            verdict,
            subject,
            command,
            source: line.trim().to_string(),
        })
    }
}

fn parse_subject(text: &str) -> Result<SubjectMatcher, String> {
    if text.is_empty() || text == "*" {
        return Ok(SubjectMatcher::Any);
    }

    let (protocol, rest) = if text.starts_with("user:") || text.starts_with("room:") {
        (None, text)
    } else if let Some((protocol, rest)) = text.split_once(':') {
        validate_ident(protocol, "protocol")?;
        (Some(protocol.to_string()), rest)
    } else {
        validate_ident(text, "protocol")?;
        return Ok(SubjectMatcher::Protocol(text.to_string()));
    };

    let (prefix, value) = rest
        .split_once(':')
        .ok_or_else(|| format!("subject '{text}' is missing its ':'-delimited value"))?;
    if value.is_empty() {
        return Err(format!("subject '{text}' has an empty {prefix} part"));
    }
    match prefix {
        "user" => Ok(SubjectMatcher::User {
            protocol,
            id: value.to_string(),
        }),
        "room" => Ok(SubjectMatcher::Room {
            protocol,
            name: value.to_string(),
        }),
        other => Err(format!(
            "subject prefix '{other}' is not one of 'user' or 'room'"
        )),
    }
}

fn parse_command(text: &str) -> Result<CommandMatcher, String> {
    if text.is_empty() || text == "*" {
        return Ok(CommandMatcher::Any);
    }
    match text.split_once('.') {
        Some((plugin, "*")) => {
            validate_ident(plugin, "plugin")?;
            Ok(CommandMatcher::Plugin(plugin.to_string()))
        }
        Some((plugin, name)) => {
            validate_ident(plugin, "plugin")?;
            command_key(name).map_err(|e| e.to_string())?;
            Ok(CommandMatcher::Command {
                plugin: Some(plugin.to_string()),
                name: name.to_string(),
            })
        }
        None => {
            command_key(text).map_err(|e| e.to_string())?;
            Ok(CommandMatcher::Command {
                plugin: None,
                name: text.to_string(),
            })
        }
    }
}

fn validate_ident(text: &str, what: &str) -> Result<(), String> {
    if text.is_empty()
        || !text
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("invalid {what} name '{text}'"));
    }
    Ok(())
}

// ============================================================================
// Matching
// ============================================================================

fn same_protocol(pattern: &Option<String>, protocol: &str) -> bool {
    pattern
        .as_deref()
        .is_none_or(|p| p.eq_ignore_ascii_case(protocol))
}

impl SubjectMatcher {
    /// Whether this matcher covers a message from `user` on `protocol`,
    /// optionally in `room`.
    pub fn matches(&self, protocol: &str, room: Option<&Room>, user: &User) -> bool {
        match self {
            Self::Any => true,
            Self::Protocol(p) => p.eq_ignore_ascii_case(protocol),
            Self::User { protocol: p, id } => {
                same_protocol(p, protocol) && (user.id() == id || user.real().id() == id)
            }
            Self::Room { protocol: p, name } => {
                same_protocol(p, protocol) && room.is_some_and(|r| r.name() == name)
            }
        }
    }
}

impl CommandMatcher {
    /// Whether this matcher covers `command` owned by `namespace`.
    pub fn matches(&self, namespace: Option<&str>, command: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Plugin(plugin) => namespace.is_some_and(|ns| ns.eq_ignore_ascii_case(plugin)),
            Self::Command { plugin, name } => {
                name.eq_ignore_ascii_case(command)
                    && plugin.as_deref().is_none_or(|p| {
                        namespace.is_some_and(|ns| ns.eq_ignore_ascii_case(p))
                    })
            }
        }
    }
}

// ============================================================================
// RuleSet
// ============================================================================

/// An ordered rule list plus the set of admin protocols.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    admin: HashSet<String>,
}

impl RuleSet {
    /// Parses rule lines in order. Blank lines and `#` comments are skipped.
    pub fn parse<I, S>(lines: I) -> Result<Self, RuleParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = lines
            .into_iter()
            .filter(|l| {
                let l = l.as_ref().trim();
                !l.is_empty() && !l.starts_with('#')
            })
            .map(|l| l.as_ref().parse())
            .collect::<Result<Vec<Rule>, _>>()?;
        Ok(Self {
            rules,
            admin: HashSet::new(),
        })
    }

    /// Marks protocols whose users bypass all rules.
    pub fn with_admin_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin.extend(protocols.into_iter().map(Into::into));
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_admin(&self, protocol: &str) -> bool {
        self.admin.contains(protocol)
    }

    /// Decides whether `user` may run `command`.
    pub fn evaluate(
        &self,
        protocol: &str,
        room: Option<&Room>,
        user: &User,
        namespace: Option<&str>,
        command: &str,
    ) -> Decision {
        if self.is_admin(protocol) {
            return Decision {
                verdict: Verdict::Allow,
                rule: None,
                admin: true,
            };
        }

        let last = self
            .rules
            .iter()
            .filter(|rule| {
                rule.subject.matches(protocol, room, user)
                    && rule.command.matches(namespace, command)
            })
            .last();

        Decision {
            verdict: last.map_or(Verdict::Allow, |r| r.verdict),
            rule: last.cloned(),
            admin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use sibyl_core::UserKind;

    use super::*;

    fn user(id: &str) -> User {
        User::new("xmpp", id, UserKind::Private)
    }

    fn rules(lines: &[&str]) -> RuleSet {
        RuleSet::parse(lines).unwrap()
    }

    #[test]
    fn test_last_matching_rule_wins() {
        let set = rules(&["allow * *", "deny user:alice *"]);
        let alice = set.evaluate("xmpp", None, &user("alice"), Some("util"), "echo");
        let bob = set.evaluate("xmpp", None, &user("bob"), Some("util"), "echo");

        assert_eq!(alice.verdict, Verdict::Deny);
        assert_eq!(alice.rule.unwrap().source(), "deny user:alice *");
        assert_eq!(bob.verdict, Verdict::Allow);
    }

    #[test]
    fn test_order_reversal_changes_outcome() {
        let set = rules(&["deny user:alice *", "allow * *"]);
        let alice = set.evaluate("xmpp", None, &user("alice"), None, "echo");
        assert!(alice.is_allowed());
    }

    #[test]
    fn test_default_is_allow() {
        let set = RuleSet::default();
        let d = set.evaluate("irc", None, &user("x"), None, "echo");
        assert!(d.is_allowed());
        assert!(d.rule.is_none());
    }

    #[test]
    fn test_admin_protocol_short_circuits() {
        let set = rules(&["deny * *"]).with_admin_protocols(["cli"]);
        let d = set.evaluate("cli", None, &User::new("cli", "root", UserKind::Private), None, "die");
        assert!(d.is_allowed());
        assert!(d.admin);
        assert!(!set.evaluate("xmpp", None, &user("root"), None, "die").is_allowed());
    }

    #[test]
    fn test_evaluation_is_pure() {
        let set = rules(&["allow * *", "deny xmpp:room:lobby@conf games.*"]);
        let room = Room::new("xmpp", "lobby@conf");
        let first = set.evaluate("xmpp", Some(&room), &user("bob"), Some("games"), "roll");
        for _ in 0..3 {
            let again = set.evaluate("xmpp", Some(&room), &user("bob"), Some("games"), "roll");
            assert_eq!(again, first);
        }
        assert_eq!(first.verdict, Verdict::Deny);
    }

    #[test]
    fn test_subject_forms() {
        let room = Room::new("xmpp", "lobby@conf");
        let bob = user("bob");

        let proto = parse_subject("xmpp").unwrap();
        assert!(proto.matches("xmpp", None, &bob));
        assert!(!proto.matches("irc", None, &bob));

        let qualified = parse_subject("irc:user:bob").unwrap();
        assert!(!qualified.matches("xmpp", None, &bob));

        let in_room = parse_subject("room:lobby@conf").unwrap();
        assert!(in_room.matches("xmpp", Some(&room), &bob));
        assert!(!in_room.matches("xmpp", None, &bob));
    }

    #[test]
    fn test_user_rule_matches_real_identity() {
        let masked = User::new("xmpp", "lobby@conf/bobby", UserKind::Group)
            .with_real(user("bob"))
            .unwrap();
        let set = rules(&["deny user:bob *"]);
        assert!(!set.evaluate("xmpp", None, &masked, None, "echo").is_allowed());
    }

    #[test]
    fn test_command_forms() {
        assert!(parse_command("games.*").unwrap().matches(Some("games"), "roll"));
        assert!(!parse_command("games.*").unwrap().matches(Some("util"), "roll"));
        assert!(parse_command("games.roll").unwrap().matches(Some("games"), "ROLL"));
        assert!(!parse_command("games.roll").unwrap().matches(Some("util"), "roll"));
        assert!(parse_command("roll").unwrap().matches(Some("anything"), "roll"));
        assert!(parse_command("").unwrap().matches(None, "x"));
    }

    #[test]
    fn test_empty_fields_match_everything() {
        let set = rules(&["deny"]);
        assert!(!set.evaluate("irc", None, &user("x"), None, "echo").is_allowed());
    }

    #[test]
    fn test_malformed_rules_are_rejected() {
        for bad in [
            "maybe * *",
            "allow user: *",
            "allow xmpp:chan:lobby *",
            "allow xmpp:user *",
            "allow * games.",
            "allow * bad-name",
            "allow * * extra",
            "allow x@y *",
        ] {
            assert!(bad.parse::<Rule>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let set = RuleSet::parse(["# header", "", "allow * *"]).unwrap();
        assert_eq!(set.rules().len(), 1);
    }
}

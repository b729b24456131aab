//! Chat-driven polls.
//!
//! ```text
//! !poll pizza,tacos,sushi     open a poll (default permission: mod)
//! !vote tacos                 cast one vote per channel (default: all)
//! !endpoll                    close it and announce the winner (default: mod)
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{Value, json};

use crate::extension::{
    ChatAuthor, ChatMessage, Extension, ExtensionContext, ExtensionError, ExtensionResult,
    Notifier, Settings, SettingsExt,
};

/// Who may run a poll command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    All,
    Moderator,
    Owner,
}

impl Permission {
    pub fn allows(&self, author: &ChatAuthor) -> bool {
        match self {
            Permission::All => true,
            Permission::Moderator => author.is_moderator || author.is_owner,
            Permission::Owner => author.is_owner,
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Permission::All),
            "mod" | "moderator" => Ok(Permission::Moderator),
            "owner" => Ok(Permission::Owner),
            other => Err(format!("unknown permission '{other}', expected all, mod or owner")),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::All => "all",
            Permission::Moderator => "mod",
            Permission::Owner => "owner",
        })
    }
}

/// Final tally of a closed poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResult {
    pub winner: String,
    /// Options in creation order with their vote counts.
    pub votes: Vec<(String, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
struct PollSettings {
    prefix_new: String,
    prefix_vote: String,
    prefix_end: String,
    option_delimiter: String,
    new_permission: Permission,
    vote_permission: Permission,
    end_permission: Permission,
    announce_to: Option<String>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            prefix_new: "!poll".into(),
            prefix_vote: "!vote".into(),
            prefix_end: "!endpoll".into(),
            option_delimiter: ",".into(),
            new_permission: Permission::Moderator,
            vote_permission: Permission::All,
            end_permission: Permission::Moderator,
            announce_to: None,
        }
    }
}

impl PollSettings {
    fn parse(settings: &Settings) -> ExtensionResult<Self> {
        let defaults = Self::default();
        let permission = |key: &str, default: Permission| -> ExtensionResult<Permission> {
            match settings.get(key) {
                None => Ok(default),
                Some(_) => settings.require_str(key)?.parse().map_err(|reason| {
                    ExtensionError::InvalidSetting {
                        key: key.to_string(),
                        reason,
                    }
                }),
            }
        };

        let parsed = Self {
            prefix_new: settings.str_or("prefix_new", &defaults.prefix_new)?.to_string(),
            prefix_vote: settings.str_or("prefix_vote", &defaults.prefix_vote)?.to_string(),
            prefix_end: settings.str_or("prefix_end", &defaults.prefix_end)?.to_string(),
            option_delimiter: settings
                .str_or("option_delimiter", &defaults.option_delimiter)?
                .to_string(),
            new_permission: permission("new_permission", defaults.new_permission)?,
            vote_permission: permission("vote_permission", defaults.vote_permission)?,
            end_permission: permission("end_permission", defaults.end_permission)?,
            announce_to: match settings.get("announce_to") {
                None | Some(Value::Null) => None,
                Some(_) => Some(settings.require_str("announce_to")?.to_string()),
            },
        };

        if parsed.option_delimiter.is_empty() {
            return Err(ExtensionError::InvalidSetting {
                key: "option_delimiter".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(parsed)
    }
}

#[derive(Debug)]
struct Poll {
    options: Vec<(String, u32)>,
    voted: HashSet<String>,
}

impl Poll {
    fn winner(&self) -> Option<&str> {
        let mut best: Option<&(String, u32)> = None;
        for option in &self.options {
            if best.is_none_or(|b| option.1 > b.1) {
                best = Some(option);
            }
        }
        best.map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Default)]
struct PollState {
    settings: PollSettings,
    notifier: Option<Notifier>,
    active: Option<Poll>,
    last_result: Option<PollResult>,
}

/// One poll at a time, one vote per chat channel. Ties go to the option
/// listed first.
#[derive(Debug, Default)]
pub struct PollExtension {
    state: Mutex<PollState>,
}

impl PollExtension {
    pub const TYPE_NAME: &'static str = "poll";

    pub fn new() -> Self {
        Self::default()
    }

    /// Options of the open poll, in creation order.
    pub fn active_options(&self) -> Option<Vec<String>> {
        self.lock()
            .active
            .as_ref()
            .map(|poll| poll.options.iter().map(|(name, _)| name.clone()).collect())
    }

    pub fn tally(&self) -> Vec<(String, u32)> {
        self.lock()
            .active
            .as_ref()
            .map(|poll| poll.options.clone())
            .unwrap_or_default()
    }

    pub fn last_result(&self) -> Option<PollResult> {
        self.lock().last_result.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(state: &mut PollState, args: &str) {
        let options: Vec<(String, u32)> = args
            .split(state.settings.option_delimiter.as_str())
            .map(str::trim)
            .filter(|option| !option.is_empty())
            .map(|option| (option.to_string(), 0))
            .collect();
        if options.is_empty() {
            tracing::debug!("Poll command without options ignored");
            return;
        }
        tracing::info!(options = options.len(), "Poll opened");
        state.active = Some(Poll {
            options,
            voted: HashSet::new(),
        });
    }

    fn vote(state: &mut PollState, author: &ChatAuthor, choice: &str) {
        let Some(poll) = state.active.as_mut() else {
            tracing::debug!("Vote without an open poll");
            return;
        };
        if poll.voted.contains(&author.channel_id) {
            tracing::debug!(channel = %author.channel_id, "Duplicate vote ignored");
            return;
        }
        match poll.options.iter_mut().find(|(name, _)| name == choice) {
            Some((_, count)) => {
                *count += 1;
                poll.voted.insert(author.channel_id.clone());
            }
            None => tracing::debug!(choice, "Vote for unknown option ignored"),
        }
    }

    fn close(state: &mut PollState) -> Option<PollResult> {
        let poll = state.active.take()?;
        let winner = poll.winner()?.to_string();
        let result = PollResult {
            winner,
            votes: poll.options,
        };
        tracing::info!(winner = %result.winner, "Poll closed");
        state.last_result = Some(result.clone());
        Some(result)
    }
}

impl Extension for PollExtension {
    fn load(&self, ctx: &ExtensionContext) -> ExtensionResult<()> {
        self.lock().notifier = Some(ctx.notifier().clone());
        Ok(())
    }

    fn configure(&self, settings: &Settings) -> ExtensionResult<()> {
        let parsed = PollSettings::parse(settings)?;
        self.lock().settings = parsed;
        Ok(())
    }

    fn handle_message(&self, message: &ChatMessage) -> ExtensionResult<()> {
        let text = message.text.trim();
        let (command, args) = text.split_once(' ').unwrap_or((text, ""));
        let author = &message.author;

        let (announcement, notifier) = {
            let mut state = self.lock();
            let settings = &state.settings;

            if command == settings.prefix_new {
                if settings.new_permission.allows(author) {
                    Self::open(&mut state, args);
                } else {
                    tracing::debug!(author = %author.name, "Poll creation not permitted");
                }
                return Ok(());
            }
            if command == settings.prefix_vote {
                if settings.vote_permission.allows(author) {
                    Self::vote(&mut state, author, args.trim());
                }
                return Ok(());
            }
            if command != settings.prefix_end || !settings.end_permission.allows(author) {
                return Ok(());
            }

            let Some(result) = Self::close(&mut state) else {
                return Ok(());
            };
            let target = state.settings.announce_to.clone();
            (target.map(|t| (t, result)), state.notifier.clone())
        };

        if let (Some((target, result)), Some(notifier)) = (announcement, notifier) {
            notifier.notify(
                &target,
                json!({
                    "poll_winner": result.winner,
                    "votes": result.votes,
                }),
            )?;
        }
        Ok(())
    }

    fn handle_notify(&self, source: Option<&str>, _data: &Value) -> ExtensionResult<()> {
        tracing::debug!(source = source.unwrap_or("host"), "Poll ignores notifications");
        Ok(())
    }

    fn tick(&self, _timestamp_nanos: i64, _interval_nanos: i64) -> ExtensionResult<()> {
        Ok(())
    }

    fn unload(&self) -> ExtensionResult<()> {
        let mut state = self.lock();
        state.active = None;
        state.notifier = None;
        Ok(())
    }
}

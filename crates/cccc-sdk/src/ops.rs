//! Convenience methods, one per daemon operation
//!
//! Each method only builds the argument object and delegates to
//! [`CcccClient::call`]. Optional keys are sent only when set; `by` falls back
//! to the client's default actor unless noted.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::client::CcccClient;
use crate::error::ClientError;
use crate::events::EventStream;

type OpResult = Result<Map<String, Value>, ClientError>;

/// Argument object under construction
#[derive(Debug, Default)]
struct Args(Map<String, Value>);

impl Args {
    fn new() -> Self {
        Self::default()
    }

    fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn set_opt<T: Into<Value>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Set a string only when it is non-empty
    fn set_str(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) if !value.is_empty() => self.set(key, value),
            _ => self,
        }
    }

    fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Group lifecycle state accepted by `group_set_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Active,
    Idle,
    Paused,
}

impl GroupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupCreateOptions {
    pub title: String,
    pub topic: String,
    pub by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupAutomationUpdateOptions {
    pub group_id: String,
    pub ruleset: Value,
    pub expected_version: Option<i64>,
    pub by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupAutomationManageOptions {
    pub group_id: String,
    /// Must not be empty
    pub actions: Vec<Value>,
    pub expected_version: Option<i64>,
    pub by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ActorAddOptions {
    pub group_id: String,
    pub actor_id: Option<String>,
    pub title: Option<String>,
    pub runtime: Option<String>,
    pub runner: Option<String>,
    pub command: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub env_private: Option<BTreeMap<String, String>>,
    pub profile_id: Option<String>,
    pub default_scope_key: Option<String>,
    pub submit: Option<String>,
    pub by: Option<String>,
}

impl ActorAddOptions {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActorUpdateOptions {
    pub group_id: String,
    pub actor_id: String,
    /// Sent as `{}` when unset
    pub patch: Option<Map<String, Value>>,
    pub profile_id: Option<String>,
    pub profile_action: Option<String>,
    pub by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ActorEnvPrivateUpdateOptions {
    pub group_id: String,
    pub actor_id: String,
    pub set: Option<BTreeMap<String, String>>,
    pub unset: Option<Vec<String>>,
    pub clear: bool,
    pub by: Option<String>,
}

/// Message delivery options shared by `send`, `send_cross_group` and `reply`
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub text: String,
    pub to: Option<Vec<String>>,
    /// `"normal"` when unset
    pub priority: Option<String>,
    pub reply_required: bool,
    pub by: Option<String>,
}

impl MessageOptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn to(mut self, recipients: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.to = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InboxListOptions {
    pub group_id: String,
    pub actor_id: String,
    /// 50 when unset
    pub limit: Option<u32>,
    /// `"all"` when unset
    pub kind_filter: Option<String>,
    pub by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextSyncOptions {
    pub group_id: String,
    pub ops: Vec<Value>,
    pub dry_run: bool,
    /// `"system"` when unset
    pub by: Option<String>,
}

/// Subscription filter for [`CcccClient::events_stream`]
#[derive(Debug, Clone, Default)]
pub struct EventsStreamOptions {
    pub group_id: String,
    pub kinds: Option<Vec<String>>,
    pub since_event_id: Option<String>,
    pub since_ts: Option<String>,
    /// Handshake timeout, the client default when unset
    pub timeout: Option<Duration>,
    pub by: Option<String>,
}

impl EventsStreamOptions {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::default()
        }
    }
}

/// Sorted, de-duplicated, non-blank kinds
fn normalize_kinds(kinds: &[String]) -> Vec<String> {
    kinds
        .iter()
        .map(|kind| kind.trim())
        .filter(|kind| !kind.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect(),
    )
}

impl CcccClient {
    fn by_or_default(&self, by: Option<&str>) -> String {
        by.filter(|by| !by.is_empty())
            .unwrap_or(self.default_by())
            .to_string()
    }

    pub async fn ping(&self) -> OpResult {
        self.call("ping", Map::new()).await
    }

    // Groups

    pub async fn groups(&self) -> OpResult {
        self.call("groups", Map::new()).await
    }

    pub async fn group_show(&self, group_id: &str) -> OpResult {
        self.call("group_show", Args::new().set("group_id", group_id).into_map())
            .await
    }

    pub async fn group_create(&self, options: &GroupCreateOptions) -> OpResult {
        let args = Args::new()
            .set("title", options.title.as_str())
            .set("topic", options.topic.as_str())
            .set("by", self.by_or_default(options.by.as_deref()));
        self.call("group_create", args.into_map()).await
    }

    pub async fn group_update(
        &self,
        group_id: &str,
        patch: Map<String, Value>,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("patch", patch)
            .set("by", self.by_or_default(by));
        self.call("group_update", args.into_map()).await
    }

    pub async fn group_delete(&self, group_id: &str, by: Option<&str>) -> OpResult {
        self.group_op("group_delete", group_id, by).await
    }

    pub async fn group_use(&self, group_id: &str, path: &str, by: Option<&str>) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("path", path)
            .set("by", self.by_or_default(by));
        self.call("group_use", args.into_map()).await
    }

    pub async fn group_set_state(
        &self,
        group_id: &str,
        state: GroupState,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("state", state.as_str())
            .set("by", self.by_or_default(by));
        self.call("group_set_state", args.into_map()).await
    }

    pub async fn group_settings_update(
        &self,
        group_id: &str,
        patch: Map<String, Value>,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("patch", patch)
            .set("by", self.by_or_default(by));
        self.call("group_settings_update", args.into_map()).await
    }

    pub async fn group_automation_state(&self, group_id: &str, by: Option<&str>) -> OpResult {
        self.group_op("group_automation_state", group_id, by).await
    }

    pub async fn group_automation_update(&self, options: &GroupAutomationUpdateOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("by", self.by_or_default(options.by.as_deref()))
            .set("ruleset", options.ruleset.clone())
            .set_opt("expected_version", options.expected_version);
        self.call("group_automation_update", args.into_map()).await
    }

    /// # Errors
    ///
    /// Returns `ClientError::InvalidArgument` without contacting the daemon
    /// when `actions` is empty.
    pub async fn group_automation_manage(&self, options: &GroupAutomationManageOptions) -> OpResult {
        if options.actions.is_empty() {
            return Err(ClientError::InvalidArgument {
                message: "group_automation_manage requires a non-empty actions list".into(),
            });
        }
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("by", self.by_or_default(options.by.as_deref()))
            .set("actions", options.actions.clone())
            .set_opt("expected_version", options.expected_version);
        self.call("group_automation_manage", args.into_map()).await
    }

    pub async fn group_automation_reset_baseline(
        &self,
        group_id: &str,
        expected_version: Option<i64>,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("by", self.by_or_default(by))
            .set_opt("expected_version", expected_version);
        self.call("group_automation_reset_baseline", args.into_map())
            .await
    }

    pub async fn group_start(&self, group_id: &str, by: Option<&str>) -> OpResult {
        self.group_op("group_start", group_id, by).await
    }

    pub async fn group_stop(&self, group_id: &str, by: Option<&str>) -> OpResult {
        self.group_op("group_stop", group_id, by).await
    }

    /// Attach `path` to a group; `group_id` is omitted when empty
    pub async fn attach(&self, path: &str, group_id: Option<&str>, by: Option<&str>) -> OpResult {
        let args = Args::new()
            .set("path", path)
            .set("by", self.by_or_default(by))
            .set_str("group_id", group_id);
        self.call("attach", args.into_map()).await
    }

    async fn group_op(&self, op: &str, group_id: &str, by: Option<&str>) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("by", self.by_or_default(by));
        self.call(op, args.into_map()).await
    }

    // Actors

    pub async fn actor_list(&self, group_id: &str) -> OpResult {
        self.call("actor_list", Args::new().set("group_id", group_id).into_map())
            .await
    }

    pub async fn actor_add(&self, options: &ActorAddOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("by", self.by_or_default(options.by.as_deref()))
            .set_str("actor_id", options.actor_id.as_deref())
            .set_str("title", options.title.as_deref())
            .set_str("runtime", options.runtime.as_deref())
            .set_str("runner", options.runner.as_deref())
            .set_opt("command", options.command.clone())
            .set_opt("env", options.env.as_ref().map(string_map))
            .set_opt("env_private", options.env_private.as_ref().map(string_map))
            .set_str("profile_id", options.profile_id.as_deref())
            .set_str("default_scope_key", options.default_scope_key.as_deref())
            .set_str("submit", options.submit.as_deref());
        self.call("actor_add", args.into_map()).await
    }

    pub async fn actor_update(&self, options: &ActorUpdateOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("actor_id", options.actor_id.as_str())
            .set("patch", options.patch.clone().unwrap_or_default())
            .set("by", self.by_or_default(options.by.as_deref()))
            .set_str("profile_id", options.profile_id.as_deref())
            .set_str("profile_action", options.profile_action.as_deref());
        self.call("actor_update", args.into_map()).await
    }

    pub async fn actor_remove(&self, group_id: &str, actor_id: &str, by: Option<&str>) -> OpResult {
        self.actor_op("actor_remove", group_id, actor_id, by).await
    }

    pub async fn actor_start(&self, group_id: &str, actor_id: &str, by: Option<&str>) -> OpResult {
        self.actor_op("actor_start", group_id, actor_id, by).await
    }

    pub async fn actor_stop(&self, group_id: &str, actor_id: &str, by: Option<&str>) -> OpResult {
        self.actor_op("actor_stop", group_id, actor_id, by).await
    }

    pub async fn actor_restart(&self, group_id: &str, actor_id: &str, by: Option<&str>) -> OpResult {
        self.actor_op("actor_restart", group_id, actor_id, by).await
    }

    /// Names of the actor's private env vars (values are never returned)
    pub async fn actor_env_private_keys(
        &self,
        group_id: &str,
        actor_id: &str,
        by: Option<&str>,
    ) -> OpResult {
        self.actor_op("actor_env_private_keys", group_id, actor_id, by)
            .await
    }

    pub async fn actor_env_private_update(&self, options: &ActorEnvPrivateUpdateOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("actor_id", options.actor_id.as_str())
            .set("by", self.by_or_default(options.by.as_deref()))
            .set_opt("set", options.set.as_ref().map(string_map))
            .set_opt("unset", options.unset.clone())
            .set("clear", options.clear);
        self.call("actor_env_private_update", args.into_map()).await
    }

    async fn actor_op(&self, op: &str, group_id: &str, actor_id: &str, by: Option<&str>) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("actor_id", actor_id)
            .set("by", self.by_or_default(by));
        self.call(op, args.into_map()).await
    }

    // Messaging

    fn message_args(&self, args: Args, message: &MessageOptions) -> Args {
        args.set("text", message.text.as_str())
            .set("by", self.by_or_default(message.by.as_deref()))
            .set("priority", message.priority.as_deref().unwrap_or("normal"))
            .set("reply_required", message.reply_required)
            .set_opt("to", message.to.clone().filter(|to| !to.is_empty()))
    }

    pub async fn send(&self, group_id: &str, message: &MessageOptions, path: Option<&str>) -> OpResult {
        let args = self
            .message_args(Args::new().set("group_id", group_id), message)
            .set_str("path", path);
        self.call("send", args.into_map()).await
    }

    pub async fn send_cross_group(
        &self,
        group_id: &str,
        dst_group_id: &str,
        message: &MessageOptions,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("dst_group_id", dst_group_id);
        let args = self.message_args(args, message);
        self.call("send_cross_group", args.into_map()).await
    }

    pub async fn reply(&self, group_id: &str, reply_to: &str, message: &MessageOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("reply_to", reply_to);
        let args = self.message_args(args, message);
        self.call("reply", args.into_map()).await
    }

    /// Acknowledge a chat message; `by` defaults to the acknowledging actor
    pub async fn chat_ack(
        &self,
        group_id: &str,
        actor_id: &str,
        event_id: &str,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("actor_id", actor_id)
            .set("event_id", event_id)
            .set("by", by.unwrap_or(actor_id));
        self.call("chat_ack", args.into_map()).await
    }

    // Inbox

    pub async fn inbox_list(&self, options: &InboxListOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("actor_id", options.actor_id.as_str())
            .set("by", self.by_or_default(options.by.as_deref()))
            .set("limit", options.limit.unwrap_or(50))
            .set("kind_filter", options.kind_filter.as_deref().unwrap_or("all"));
        self.call("inbox_list", args.into_map()).await
    }

    pub async fn inbox_mark_read(
        &self,
        group_id: &str,
        actor_id: &str,
        event_id: &str,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("actor_id", actor_id)
            .set("event_id", event_id)
            .set("by", self.by_or_default(by));
        self.call("inbox_mark_read", args.into_map()).await
    }

    pub async fn inbox_mark_all_read(
        &self,
        group_id: &str,
        actor_id: &str,
        kind_filter: Option<&str>,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("actor_id", actor_id)
            .set("by", self.by_or_default(by))
            .set("kind_filter", kind_filter.unwrap_or("all"));
        self.call("inbox_mark_all_read", args.into_map()).await
    }

    /// Acknowledge a notification; `by` defaults to the acknowledging actor
    pub async fn notify_ack(
        &self,
        group_id: &str,
        actor_id: &str,
        notify_event_id: &str,
        by: Option<&str>,
    ) -> OpResult {
        let args = Args::new()
            .set("group_id", group_id)
            .set("actor_id", actor_id)
            .set("notify_event_id", notify_event_id)
            .set("by", by.unwrap_or(actor_id));
        self.call("notify_ack", args.into_map()).await
    }

    // Context

    pub async fn context_get(&self, group_id: &str) -> OpResult {
        self.call("context_get", Args::new().set("group_id", group_id).into_map())
            .await
    }

    pub async fn context_sync(&self, options: &ContextSyncOptions) -> OpResult {
        let args = Args::new()
            .set("group_id", options.group_id.as_str())
            .set("ops", options.ops.clone())
            .set("by", options.by.as_deref().unwrap_or("system"))
            .set("dry_run", options.dry_run);
        self.call("context_sync", args.into_map()).await
    }

    // Streaming

    /// Subscribe to a group's event stream
    ///
    /// See [`CcccClient::subscribe`] for the handshake and teardown rules.
    pub async fn events_stream(&self, options: &EventsStreamOptions) -> Result<EventStream, ClientError> {
        self.subscribe(events_stream_args(options, self.default_by()), options.timeout)
            .await
    }
}

fn events_stream_args(options: &EventsStreamOptions, default_by: &str) -> Map<String, Value> {
    let by = options
        .by
        .as_deref()
        .filter(|by| !by.is_empty())
        .unwrap_or(default_by);
    Args::new()
        .set("group_id", options.group_id.as_str())
        .set("by", by)
        .set_opt("kinds", options.kinds.as_deref().map(normalize_kinds))
        .set_str("since_event_id", options.since_event_id.as_deref())
        .set_str("since_ts", options.since_ts.as_deref())
        .into_map()
}

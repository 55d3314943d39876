use serde_json::{Map, Value};
use tracing::debug;

use super::path::{flatten_filter, lookup, merge_append};
use crate::config::RouteConfig;
use crate::model::Envelope;

/// A compiled routing rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub event: String,
    pub channel: String,
    filter: Vec<(String, Value)>,
    append: Map<String, Value>,
    output_type: Option<String>,
}

impl RouteRule {
    /// Compile `config`. The rule's own `append` is merged on top of the
    /// destination channel's base `append`.
    pub fn new(config: &RouteConfig, channel_append: &Map<String, Value>) -> Self {
        let mut append = channel_append.clone();
        if let Some(rule_append) = &config.append {
            merge_append(&mut append, rule_append);
        }

        Self {
            event: config.event.clone(),
            channel: config.channel.clone(),
            filter: config.filter.as_ref().map(flatten_filter).unwrap_or_default(),
            append,
            output_type: config.output_type.clone(),
        }
    }

    pub fn append(&self) -> &Map<String, Value> {
        &self.append
    }

    pub fn matches(&self, event: &Envelope) -> bool {
        event.event_type == self.event && self.filter_matches(&event.data)
    }

    /// Every filter path must be present, non-null, and equal to the
    /// expected value. An array field also matches when it contains the
    /// expected value.
    pub fn filter_matches(&self, data: &Value) -> bool {
        self.filter.iter().all(|(path, expected)| {
            let matched = match lookup(data, path) {
                None | Some(Value::Null) => false,
                Some(actual) if actual == expected => true,
                Some(Value::Array(items)) => items.contains(expected),
                Some(_) => false,
            };
            if !matched {
                debug!(
                    channel = %self.channel,
                    field = %path,
                    expected = %expected,
                    "Event does not match filter"
                );
            }
            matched
        })
    }

    /// Private copy of `event` with the append mapping merged and the type
    /// relabelled.
    pub fn apply(&self, event: &Envelope) -> Envelope {
        let mut routed = event.clone();

        if !self.append.is_empty()
            && let Value::Object(data) = &mut routed.data
        {
            merge_append(data, &self.append);
        }

        if let Some(output_type) = &self.output_type {
            routed.event_type = output_type.clone();
        }

        routed
    }
}

//! Payload transforms applied by a channel before delivery.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::config::DEFAULT_DOWNTIME_EVENT;
use crate::model::{CheckState, Envelope, Status, StatusChange, StatusType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transform {
    /// Deliver the routed envelope as-is.
    #[default]
    None,
    /// Chat attachments for a Hubot Slack adapter.
    HubotSlack,
    /// Ticket subject and description for an incident queue.
    ZendeskIncident,
}

/// Deployment settings the transforms depend on.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Slack workspace name passed to `hubot-slack`.
    pub slack_project: Option<&'a str>,
    /// Event type the downtime monitor publishes its transitions under.
    pub downtime_event: &'a str,
}

impl Default for TransformContext<'_> {
    fn default() -> Self {
        Self {
            slack_project: None,
            downtime_event: DEFAULT_DOWNTIME_EVENT,
        }
    }
}

impl Transform {
    /// Transform `event`. Event types the transform has no mapping for are
    /// passed through unchanged.
    pub fn apply(&self, event: &Envelope, context: TransformContext<'_>) -> Envelope {
        let transformed = match self {
            Transform::None => return event.clone(),
            Transform::HubotSlack => hubot_slack(event, context),
            Transform::ZendeskIncident => zendesk_incident(event),
        };

        transformed.unwrap_or_else(|| {
            warn!(
                transform = ?self,
                event_type = %event.event_type,
                "Unmatched event type for transform, sending unchanged"
            );
            event.clone()
        })
    }
}

fn status_change(event: &Envelope) -> Option<StatusChange> {
    match serde_json::from_value(event.data.clone()) {
        Ok(change) => Some(change),
        Err(e) => {
            warn!(error = %e, "Event payload is not a status change");
            None
        }
    }
}

fn service_name(change: &StatusChange) -> &str {
    change
        .service
        .as_ref()
        .map(|service| service.name.as_str())
        .unwrap_or_default()
}

fn hubot_slack(event: &Envelope, context: TransformContext<'_>) -> Option<Envelope> {
    let channels = event.data.get("channels").cloned().unwrap_or(Value::Null);

    let attachment = match event.event_type.as_str() {
        downtime if downtime == context.downtime_event => {
            let recovered = event.data.get("status").and_then(Value::as_str) == Some("ok");
            let (text, colour) = if recovered {
                ("Icinga 2 is back!", "good")
            } else {
                ("Icinga 2 is down!", "danger")
            };
            json!({
                "fallback": text,
                "text": text,
                "color": colour,
            })
        }
        "status-change" => status_change_attachment(&status_change(event)?),
        _ => return None,
    };

    Some(Envelope::new(
        "hubot-slack",
        json!({
            "slack": context.slack_project,
            "channels": channels,
            "attachments": [attachment],
        }),
    ))
}

fn state_colour(state: &CheckState) -> &'static str {
    match (state.status, state.status_type) {
        (Status::Ok, _) => "good",
        (Status::Warning, _) => "warning",
        (Status::Critical, StatusType::Hard) => "danger",
        (Status::Critical, StatusType::Soft) => "#E8723C",
        (Status::Unknown, _) => "#a4f",
    }
}

fn status_text(state: &CheckState) -> String {
    match state.status {
        Status::Ok => state.status.to_string(),
        status => {
            let pending = match state.status_type {
                StatusType::Soft => "Pending",
                StatusType::Hard => "Confirmed",
            };
            format!("{} ({})", status, pending)
        }
    }
}

fn status_change_attachment(change: &StatusChange) -> Value {
    let host = change.host.name.as_str();
    let service = service_name(change);
    let title = format!(
        "Icinga Check: {}/{} is now {}",
        host,
        service,
        status_text(&change.state)
    );

    let mut fields = vec![
        json!({"title": "Host", "value": host, "short": true}),
        json!({"title": "Service", "value": service, "short": true}),
    ];

    if change.state.status != Status::Ok {
        let attempts = match change.state.status_type {
            StatusType::Hard => match &change.previous_state {
                Some(previous) => {
                    let tries = previous.attempt + 1;
                    let plural = if tries == 1 { "" } else { "s" };
                    format!("Confirmed after {} attempt{}", tries, plural)
                }
                None => "Confirmed".to_string(),
            },
            StatusType::Soft => format!("{} (Pending)", change.state.attempt),
        };
        fields.push(json!({"title": "Attempt", "value": attempts, "short": true}));
    }

    if let Some(previous) = &change.previous_state {
        fields.push(json!({
            "title": "Previous State",
            "value": status_text(previous),
            "short": true
        }));
    }

    json!({
        "fallback": format!("{}\r\n{}", title, change.output),
        "title": title,
        "text": change.output,
        "color": state_colour(&change.state),
        "fields": fields,
    })
}

fn zendesk_incident(event: &Envelope) -> Option<Envelope> {
    if event.event_type != "status-change" {
        return None;
    }

    let change = status_change(event)?;
    let host = change.host.name.as_str();
    let service = service_name(&change);

    Some(Envelope::new(
        "zendesk-ticket",
        json!({
            "subject": format!("Icinga Check: {}/{} is now {}", host, service, change.state.status),
            "description": format!("Icinga alert for: {}, {}\r\n{}", host, service, change.output),
        }),
    ))
}

//! Notification sinks (spec.md §4.8/§6). `url`/`percent-encoding` handle
//! safe webhook URL templating; delivery reuses the `reqwest` client
//! already in the stack for upstream polling.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::HashMap;

use crate::state::models::Alert;

#[derive(Debug, Clone, serde::Serialize)]
pub struct NotificationPayload {
    pub body: String,
    pub title: String,
    pub kind: NotificationKind,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Failure,
}

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> anyhow::Result<()>;
    fn name(&self) -> &str;
}

pub struct LoggingSink;

#[async_trait::async_trait]
impl NotificationSink for LoggingSink {
    async fn send(&self, payload: &NotificationPayload) -> anyhow::Result<()> {
        tracing::info!(title = %payload.title, body = %payload.body, "notification");
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Renders `{field}` placeholders from a flat field map, percent-encoding
/// each substitution so the result is always a valid URL component.
/// Malformed templates (an unmatched `{`/`}` or an unknown field) surface
/// as an error rather than silently dispatching (spec.md §4.8).
pub fn render_template(template: &str, fields: &HashMap<String, String>) -> anyhow::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            let mut closed = false;
            for (_, c2) in chars.by_ref() {
                if c2 == '}' {
                    closed = true;
                    break;
                }
                name.push(c2);
            }
            if !closed {
                anyhow::bail!("unclosed '{{' in webhook template");
            }
            let value = fields
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("unknown template field '{name}'"))?;
            out.push_str(&utf8_percent_encode(value, NON_ALPHANUMERIC).to_string());
        } else if c == '}' {
            anyhow::bail!("unmatched '}}' in webhook template");
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

pub struct WebhookSink {
    client: reqwest::Client,
    url_template: String,
    name: String,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template: url_template.into(),
            name: name.into(),
        }
    }

    fn fields_for(payload: &NotificationPayload) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), payload.title.clone());
        fields.insert("body".to_string(), payload.body.clone());
        fields
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, payload: &NotificationPayload) -> anyhow::Result<()> {
        let fields = Self::fields_for(payload);
        let rendered = render_template(&self.url_template, &fields)?;
        let url = url::Url::parse(&rendered)?;
        self.client
            .post(url)
            .json(&serde_json::json!({ "title": payload.title, "body": payload.body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Apprise HTTP sink, posting to an Apprise server's
/// `notify/<configKey>` endpoint (spec.md §6).
pub struct AppriseSink {
    client: reqwest::Client,
    base_url: url::Url,
    config_key: String,
}

impl AppriseSink {
    pub fn new(base_url: &str, config_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: url::Url::parse(base_url)?,
            config_key: config_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl NotificationSink for AppriseSink {
    async fn send(&self, payload: &NotificationPayload) -> anyhow::Result<()> {
        let url = self.base_url.join(&format!("notify/{}", self.config_key))?;
        let kind = match payload.kind {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Failure => "failure",
        };
        self.client
            .post(url)
            .json(&serde_json::json!({
                "body": payload.body,
                "title": payload.title,
                "type": kind,
                "urls": Vec::<String>::new(),
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "apprise"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_fields_with_percent_encoding() {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), "cpu high!".to_string());
        let rendered = render_template("https://hooks.example/{title}", &fields).unwrap();
        assert!(rendered.contains("cpu%20high%21") || rendered.contains("cpu%20high!"));
    }

    #[test]
    fn unknown_field_errors_instead_of_dispatching() {
        let fields = HashMap::new();
        let err = render_template("https://hooks.example/{missing}", &fields);
        assert!(err.is_err());
    }

    #[test]
    fn unclosed_brace_errors() {
        let fields = HashMap::new();
        let err = render_template("https://hooks.example/{title", &fields);
        assert!(err.is_err());
    }
}

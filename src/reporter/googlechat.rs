//! Delivery of reports to a Google Chat space through an incoming webhook.
//!
//! See <https://developers.google.com/workspace/chat/quickstart/webhooks>.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::{json, Value};

use crate::report::{Annotation, BackupReport, FieldData, ReportField};

use super::{reports_to_deliver, BackupReporter};

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Sized for what fits on one line of a phone screen.
const DEFAULT_MAX_LINE_LENGTH: usize = 32;

const FIELD_PADDING: &str = "  ";

/// Renders reports as Google Chat message text.
#[derive(Debug, Clone)]
pub struct GoogleChatReportRenderer {
    /// Maximum width of a line of packed fields, in characters.
    pub max_line_length: usize,
}

impl Default for GoogleChatReportRenderer {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl GoogleChatReportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn annotation_emoji(annotation: Annotation) -> Option<&'static str> {
        match annotation {
            Annotation::Ok => Some("✅"),
            Annotation::Warning => Some("⚠️"),
            Annotation::Error => Some("🚨"),
            Annotation::ErrorUnknown => Some("❓"),
            Annotation::MultilineText => None,
        }
    }

    /// The field's emoji wrapped in `before` and `after`, or an empty string if it has none.
    pub fn field_emoji(&self, field: &ReportField, before: &str, after: &str) -> String {
        match field.annotation().and_then(Self::annotation_emoji) {
            Some(emoji) => format!("{before}{emoji}{after}"),
            None => String::new(),
        }
    }

    pub fn render_field(&self, field: &ReportField) -> String {
        match &field.data {
            FieldData::Bool(b) => format!(
                "*{}* {}{}",
                field.label,
                if *b { "yes" } else { "no" },
                self.field_emoji(field, " ", "")
            ),
            data if field.annotation() == Some(Annotation::MultilineText) => {
                format!("*{}*\n{}", field.label, data)
            }
            data => format!("*{}* {}{}", field.label, data, self.field_emoji(field, " ", "")),
        }
    }

    /// Render the header line and pack the fields onto lines.
    ///
    /// The first field on a line is never wrapped, however long. Multi-line
    /// fields always start a new line. The asterisks around a label are not
    /// displayed, so they do not count toward the width.
    pub fn render_report(&self, report: &BackupReport) -> String {
        let status = if report.successful {
            Annotation::Ok
        } else {
            Annotation::Error
        };
        let mut text = format!(
            "*{}* {}\n",
            report.name,
            Self::annotation_emoji(status).unwrap_or_default()
        );

        let mut line_length = 0;
        for field in &report.fields {
            let rendered = self.render_field(field);
            let rendered_length = rendered.chars().count();

            let (newline, padding) = if line_length == 0 {
                (false, "")
            } else if field.annotation() == Some(Annotation::MultilineText) {
                (true, "")
            } else if line_length + FIELD_PADDING.len() + rendered_length - 2 > self.max_line_length
            {
                (true, "")
            } else {
                (false, FIELD_PADDING)
            };

            if newline {
                text.push('\n');
                line_length = 0;
            }

            text.push_str(padding);
            text.push_str(&rendered);
            line_length += padding.len() + rendered_length;
        }

        text
    }
}

/// A webhook POST, as handed to a [`WebhookTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub payload: Value,
}

/// Sends webhook requests and returns the HTTP status code.
pub trait WebhookTransport {
    fn post(&mut self, request: &WebhookRequest) -> Result<u16>;
}

/// [`WebhookTransport`] over a blocking `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

impl WebhookTransport for ReqwestTransport {
    fn post(&mut self, request: &WebhookRequest) -> Result<u16> {
        let body = serde_json::to_vec(&request.payload).context("Failed to encode payload")?;

        let mut builder = self
            .client
            .post(&request.url)
            .query(&request.params)
            .body(body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .context("Failed to post message to Google Chat")?;

        Ok(response.status().as_u16())
    }
}

/// Delivers reports to Google Chat, one message per report, threaded together.
///
/// Consecutive posts are spaced at least `seconds_between_messages` apart to
/// stay under the webhook rate limit. A 429 response is retried up to
/// `max_retries` times; any other status is final.
pub struct GoogleChatReporter<T: WebhookTransport> {
    webhook_url: String,
    pub renderer: GoogleChatReportRenderer,
    pub transport: T,
    pub seconds_between_messages: Duration,
    pub max_retries: u32,
    /// Used for every wait, so tests can run without real delays.
    pub sleep: fn(Duration),
    last_message_put: Option<Instant>,
}

impl<T: WebhookTransport> GoogleChatReporter<T> {
    pub fn new(webhook_url: impl Into<String>, renderer: GoogleChatReportRenderer, transport: T) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            renderer,
            transport,
            seconds_between_messages: Duration::from_secs(2),
            max_retries: 3,
            sleep: thread::sleep,
            last_message_put: None,
        }
    }

    /// Post one message and return the final HTTP status.
    pub fn put_message(&mut self, text: &str, thread_key: Option<&str>) -> Result<u16> {
        let mut payload = json!({ "text": text });
        if let Some(key) = thread_key {
            payload["thread"] = json!({ "threadKey": key });
        }

        let request = WebhookRequest {
            url: self.webhook_url.clone(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/json; charset=UTF-8".to_string(),
            )],
            // Lets threadKey start a new thread when it does not exist yet.
            params: vec![(
                "messageReplyOption".to_string(),
                "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD".to_string(),
            )],
            payload,
        };

        self.wait_for_message_put();

        let mut tries = 0;
        let status = loop {
            let status = self.transport.post(&request)?;

            if status != HTTP_TOO_MANY_REQUESTS {
                break status;
            }

            log::warn!("Google Chat rate limit hit (attempt {})", tries + 1);
            (self.sleep)(self.seconds_between_messages);

            if tries >= self.max_retries {
                log::warn!("Giving up on message after {} retries", tries);
                break status;
            }

            tries += 1;
            (self.sleep)(self.seconds_between_messages);
        };

        self.last_message_put = Some(Instant::now());
        Ok(status)
    }

    /// Deliver every report in the tree, returning the final status of each post.
    pub fn send(&mut self, report: &BackupReport) -> Result<Vec<u16>> {
        let now = Local::now().format("%Y-%m-%dT%H:%M");
        let thread_key = thread_keyize(&format!("{}@{}", report.name, now));

        let mut statuses = Vec::new();
        for r in reports_to_deliver(report) {
            statuses.push(self.report_one(r, Some(&thread_key))?);
        }

        Ok(statuses)
    }

    /// Deliver a single report without its subreports.
    pub fn report_one(&mut self, report: &BackupReport, thread_key: Option<&str>) -> Result<u16> {
        let text = self.renderer.render_report(report);
        let status = self.put_message(&text, thread_key)?;
        log::info!("Delivered report '{}' to Google Chat ({status})", report.name);
        Ok(status)
    }

    fn wait_for_message_put(&self) {
        if let Some(last) = self.last_message_put {
            while last.elapsed() < self.seconds_between_messages {
                (self.sleep)(Duration::from_millis(100));
            }
        }
    }
}

impl<T: WebhookTransport> BackupReporter for GoogleChatReporter<T> {
    fn report(&mut self, report: &BackupReport) -> Result<()> {
        self.send(report).map(|_| ())
    }
}

/// Make `s` usable as a thread key.
pub fn thread_keyize(s: &str) -> String {
    s.replace(' ', "-")
}

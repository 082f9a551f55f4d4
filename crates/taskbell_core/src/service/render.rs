//! Reminder email rendering.
//!
//! # Responsibility
//! - Turn one task and tier into subject, plain-text and HTML bodies.
//!
//! # Invariants
//! - Rendering is pure and never fails.
//! - Task text is HTML-escaped before it reaches the HTML body.
//! - Minutes remaining are computed from the `now` passed at render time
//!   and never go below zero.

use crate::model::reminder::ReminderTier;
use crate::model::task::Task;
use chrono::{DateTime, Utc};

const DUE_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Rendered email content for one reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReminder {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

struct TierStyle {
    label: &'static str,
    icon: &'static str,
    accent: &'static str,
}

fn tier_style(tier: ReminderTier) -> TierStyle {
    match tier {
        ReminderTier::Near => TierStyle {
            label: "URGENT",
            icon: "🚨",
            accent: "#ff4444",
        },
        ReminderTier::Far => TierStyle {
            label: "REMINDER",
            icon: "⏰",
            accent: "#ffa500",
        },
    }
}

/// Whole minutes until `due_at`, rounded, floored at zero.
pub fn minutes_remaining(due_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (due_at - now).num_milliseconds();
    let minutes = (millis as f64 / 60_000.0).round() as i64;
    minutes.max(0)
}

/// Renders reminder emails; holds only presentation settings.
#[derive(Debug, Clone, Default)]
pub struct ReminderRenderer {
    app_url: Option<String>,
}

impl ReminderRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a "View Task" link pointing at the to-do application.
    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = Some(app_url.into());
        self
    }

    pub fn render(&self, task: &Task, tier: ReminderTier, now: DateTime<Utc>) -> RenderedReminder {
        let style = tier_style(tier);
        let label = task.display_label();
        let minutes = tier.minutes();

        let subject = format!("{} {} ({minutes}min): \"{label}\"", style.icon, style.label);

        let (due_line, remaining_line) = match task.due_at {
            Some(due_at) => (
                due_at.format(DUE_FORMAT).to_string(),
                format!("{} minutes", minutes_remaining(due_at, now)),
            ),
            None => ("no due time".to_string(), "n/a".to_string()),
        };

        let mut text_body = format!(
            "{} - {minutes} Minutes\n\n{label}\n\nDue: {due_line}\nTime remaining: {remaining_line}\n",
            style.label
        );
        if tier == ReminderTier::Near {
            text_body.push_str("\nURGENT: Task due soon!\n");
        }
        if let Some(url) = &self.app_url {
            text_body.push_str(&format!("\nView task: {url}\n"));
        }
        text_body.push_str(&format!(
            "\nThis is an automated {minutes}-minute reminder from your to-do list.\n"
        ));

        let html_body = self.render_html(&style, minutes, label, &due_line, &remaining_line, tier);

        RenderedReminder {
            subject,
            text_body,
            html_body,
        }
    }

    fn render_html(
        &self,
        style: &TierStyle,
        minutes: u32,
        label: &str,
        due_line: &str,
        remaining_line: &str,
        tier: ReminderTier,
    ) -> String {
        let accent = style.accent;
        let title = escape_html(label);
        let banner = if tier == ReminderTier::Near {
            format!(
                r#"<p style="color: {accent}; font-weight: bold; text-align: center;">&#9888; URGENT: Task due soon!</p>"#
            )
        } else {
            String::new()
        };
        let link = match &self.app_url {
            Some(url) => format!(
                r#"<div style="text-align: center; margin-top: 20px;"><a href="{}" style="background: {accent}; color: #000; padding: 10px 20px; text-decoration: none; border-radius: 4px; font-weight: bold;">View Task</a></div>"#,
                escape_html(url)
            ),
            None => String::new(),
        };

        format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
<h2 style="color: {accent}; text-align: center;">{label_text} - {minutes} Minutes</h2>
<div style="background: #1a1a2e; padding: 20px; border-radius: 8px; border: 2px solid {accent};">
<h3 style="color: #ffffff; margin-top: 0;">{title}</h3>
<p style="color: #00ffff;"><strong>Due:</strong> {due_line}</p>
<p style="color: {accent}; font-weight: bold;"><strong>Time remaining:</strong> {remaining_line}</p>
{banner}
{link}
</div>
<p style="color: #666; text-align: center; margin-top: 20px; font-size: 12px;">This is an automated {minutes}-minute reminder from your to-do list.</p>
</div>"#,
            label_text = style.label,
        )
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

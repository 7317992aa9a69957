use tera::{Context, Tera};

use super::{NotificationEvent, NotificationMessage};
use super::channel::NotifyError;

const EMAIL_TEXT: &str = r#"{{ subject }}

Monitor:  {{ monitorName }} ({{ monitorType }})
Target:   {{ target }}
Status:   {{ status }}
Severity: {{ severity }}
Time:     {{ occurredAtHuman }}
{%- if error %}
Error:    {{ error }}
{%- endif %}
{%- if durationMinutes is number %}
Downtime: {{ durationMinutes }} minutes
{%- endif %}
{% if test %}
This is a test notification. No action is required.
{% endif %}"#;

const EMAIL_HTML: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #1f2933;">
  <h2 style="color: {{ accent }};">{{ subject }}</h2>
  <table cellpadding="4">
    <tr><td><strong>Monitor</strong></td><td>{{ monitorName }} ({{ monitorType }})</td></tr>
    <tr><td><strong>Target</strong></td><td>{{ target }}</td></tr>
    <tr><td><strong>Status</strong></td><td>{{ status }}</td></tr>
    <tr><td><strong>Severity</strong></td><td>{{ severity }}</td></tr>
    <tr><td><strong>Time</strong></td><td>{{ occurredAtHuman }}</td></tr>
    {% if error %}<tr><td><strong>Error</strong></td><td>{{ error }}</td></tr>{% endif %}
    {% if durationMinutes is number %}<tr><td><strong>Downtime</strong></td><td>{{ durationMinutes }} minutes</td></tr>{% endif %}
  </table>
  {% if test %}<p><em>This is a test notification. No action is required.</em></p>{% endif %}
</body>
</html>"#;

/// Pre-parsed notification templates.
pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn new() -> Result<Self, NotifyError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![("email.txt", EMAIL_TEXT), ("email.html", EMAIL_HTML)])?;
        Ok(Self { tera })
    }

    /// Plain-text and HTML bodies of an email.
    pub fn render_email(&self, message: &NotificationMessage) -> Result<(String, String), NotifyError> {
        let context = context(message)?;
        let text = self.tera.render("email.txt", &context)?;
        let html = self.tera.render("email.html", &context)?;
        Ok((text, html))
    }

    /// Renders a user-supplied template against the message fields.
    pub fn render_custom(template: &str, message: &NotificationMessage) -> Result<String, NotifyError> {
        Ok(Tera::one_off(template, &context(message)?, false)?)
    }
}

fn context(message: &NotificationMessage) -> Result<Context, NotifyError> {
    let mut context = Context::from_serialize(message)?;
    context.insert("subject", &message.subject());
    context.insert(
        "occurredAtHuman",
        &message.occurred_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    let accent = match message.event {
        NotificationEvent::IncidentStarted => "#d32f2f",
        NotificationEvent::IncidentResolved => "#2e7d32",
    };
    context.insert("accent", accent);
    Ok(context)
}

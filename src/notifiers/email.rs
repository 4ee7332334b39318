use async_trait::async_trait;
use config::ConfigError;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::NotificationsConfig;
use crate::models::{EventKind, Listing, ListingDetails, ListingEvent};
use crate::notifiers::{NotificationOutcome, Notifier};
use crate::utils::AppError;
use crate::Result;

const SMTP_TIMEOUT_SECS: u64 = 30;

/// Rendered message for one batch of events.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailDigest {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct EmailNotifier {
    from: Mailbox,
    recipients: Vec<Mailbox>,
    removed_alert_threshold: usize,
    currency_symbol: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &NotificationsConfig) -> Result<Self> {
        let smtp = &config.smtp;
        let address = smtp
            .from_address
            .as_deref()
            .ok_or_else(|| setup_error("no sender address configured".to_string()))?;
        let address = address
            .parse::<Address>()
            .map_err(|e| setup_error(format!("invalid sender address {}: {}", address, e)))?;
        let from = Mailbox::new(Some(smtp.from_name.clone()), address);

        let recipients = config
            .recipients
            .iter()
            .map(|recipient| {
                recipient
                    .parse::<Mailbox>()
                    .map_err(|e| setup_error(format!("invalid recipient address {}: {}", recipient, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder = if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| setup_error(format!("cannot set up TLS for {}: {}", smtp.host, e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        }
        .port(smtp.port)
        .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)));

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            from,
            recipients,
            removed_alert_threshold: config.removed_alert_threshold,
            currency_symbol: config.currency_symbol.clone(),
            transport: builder.build(),
        })
    }

    /// Render the digest, or `None` when nothing passes the filters.
    ///
    /// Removed listings are only reported once at least
    /// `removed_alert_threshold` of them vanished in the same cycle.
    pub fn compose(&self, events: &[ListingEvent]) -> Option<EmailDigest> {
        let removed = events.iter().filter(|e| e.kind() == EventKind::Removed).count();
        let include_removed = removed >= self.removed_alert_threshold;

        let reported: Vec<&ListingEvent> = events
            .iter()
            .filter(|e| include_removed || e.kind() != EventKind::Removed)
            .collect();

        if reported.is_empty() {
            return None;
        }

        Some(EmailDigest {
            subject: self.format_subject(&reported),
            html: self.format_html_body(&reported),
            text: self.format_text_body(&reported),
        })
    }

    fn format_subject(&self, events: &[&ListingEvent]) -> String {
        let parts: Vec<String> = EventKind::ALL
            .iter()
            .filter_map(|kind| {
                let count = events.iter().filter(|e| e.kind() == *kind).count();
                (count > 0).then(|| format!("{} ({})", kind.title(), count))
            })
            .collect();

        format!("🏠 {}", parts.join(", "))
    }

    fn format_html_body(&self, events: &[&ListingEvent]) -> String {
        let mut html = String::from(
            r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body { font-family: Arial, sans-serif; margin: 20px; }
        h2 { border-bottom: 1px solid #ddd; padding-bottom: 5px; }
        .listing { margin: 10px 0; padding: 10px; border-radius: 5px; background: #f9f9f9; }
        .new { border-left: 4px solid #007cba; }
        .price-drop { background: #e8f5e8; border-left: 4px solid #4CAF50; }
        .removed { border-left: 4px solid #6c757d; color: #6c757d; }
        .title { font-weight: bold; }
    </style>
</head>
<body>
"#,
        );

        for kind in EventKind::ALL {
            let section: Vec<&&ListingEvent> = events.iter().filter(|e| e.kind() == kind).collect();
            if section.is_empty() {
                continue;
            }

            html.push_str(&format!("    <h2>{} ({})</h2>\n", kind.title(), section.len()));
            for event in section {
                html.push_str(&self.format_html_entry(event));
            }
        }

        html.push_str("</body>\n</html>\n");
        html
    }

    fn format_html_entry(&self, event: &ListingEvent) -> String {
        let listing = event.listing();
        let (class, price_line) = match event {
            ListingEvent::NewListing { .. } => (
                "new",
                format!("<strong>Price:</strong> {}", self.format_price(listing.price)),
            ),
            ListingEvent::PriceDrop {
                old_price,
                new_price,
                ..
            } => (
                "price-drop",
                format!(
                    "<strong>Price:</strong> {} → {} (save {})",
                    self.format_price(*old_price),
                    self.format_price(*new_price),
                    self.format_price(old_price - new_price)
                ),
            ),
            ListingEvent::Removed { .. } => (
                "removed",
                format!("<strong>Last price:</strong> {}", self.format_price(listing.price)),
            ),
        };

        let details = detail_summary(&listing.details)
            .map(|summary| format!("        {}<br>\n", escape_html(&summary)))
            .unwrap_or_default();
        let image = listing
            .details
            .image_url
            .as_deref()
            .map(|src| format!("        <img src=\"{}\" alt=\"\" width=\"240\"><br>\n", escape_html(src)))
            .unwrap_or_default();

        format!(
            r#"    <div class="listing {}">
        <div class="title">{}</div>
        {}<br>
        <strong>Rooms:</strong> {}<br>
{}{}        <a href="{}">{}</a>
    </div>
"#,
            class,
            escape_html(listing.display_name()),
            price_line,
            listing.rooms,
            details,
            image,
            escape_html(&listing.url),
            escape_html(&listing.url)
        )
    }

    fn format_text_body(&self, events: &[&ListingEvent]) -> String {
        let mut text = String::from("LISTING WATCHER ALERT\n\n");

        for kind in EventKind::ALL {
            let section: Vec<&&ListingEvent> = events.iter().filter(|e| e.kind() == kind).collect();
            if section.is_empty() {
                continue;
            }

            text.push_str(&format!("{} ({}):\n", kind.title().to_uppercase(), section.len()));
            for event in section {
                let listing: &Listing = event.listing();
                let price = match event {
                    ListingEvent::PriceDrop {
                        old_price,
                        new_price,
                        ..
                    } => format!(
                        "{} → {} (save {})",
                        self.format_price(*old_price),
                        self.format_price(*new_price),
                        self.format_price(old_price - new_price)
                    ),
                    _ => self.format_price(listing.price),
                };
                text.push_str(&format!(
                    "- {} | {} | {} rooms\n",
                    listing.display_name(),
                    price,
                    listing.rooms
                ));
                if let Some(summary) = detail_summary(&listing.details) {
                    text.push_str(&format!("  {}\n", summary));
                }
                text.push_str(&format!("  {}\n", listing.url));
            }
            text.push('\n');
        }

        text
    }

    fn format_price(&self, amount: i64) -> String {
        format!("{} {}", group_thousands(amount), self.currency_symbol)
    }

    fn build_message(&self, digest: &EmailDigest) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(digest.subject.clone());
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_PLAIN)
                        .body(digest.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_HTML)
                        .body(digest.html.clone()),
                ),
        )?;

        Ok(message)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, events: &[ListingEvent]) -> Result<NotificationOutcome> {
        let Some(digest) = self.compose(events) else {
            debug!("No events to report, skipping email");
            return Ok(NotificationOutcome::Skipped);
        };

        let message = self.build_message(&digest)?;
        self.transport.send(message).await?;

        info!("Sent \"{}\" to {} recipients", digest.subject, self.recipients.len());
        Ok(NotificationOutcome::Sent {
            recipients: self.recipients.len(),
        })
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(self.transport.test_connection().await?)
    }
}

fn group_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if amount < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn setup_error(message: String) -> AppError {
    AppError::Config(ConfigError::Message(message))
}

/// "85 m², floor 3, Apartment, renovated" from whatever details are known.
fn detail_summary(details: &ListingDetails) -> Option<String> {
    let parts: Vec<String> = [
        details.size_sqm.map(|size| format!("{} m²", size)),
        details.floor.as_ref().map(|floor| format!("floor {}", floor)),
        details.property_type.clone(),
        details.condition.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();

    (!parts.is_empty()).then(|| parts.join(", "))
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

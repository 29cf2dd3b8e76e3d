/// Email sending functionality
///
/// Plain-text transactional mail. When no SMTP server is configured every
/// send is skipped with a warning.
use crate::{
    config::EmailConfig,
    error::{PortalError, PortalResult},
};
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

/// Registration status changes members are told about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationNotice {
    Approved,
    Rejected,
    PromotedFromWaitlist,
    CancelledByAdmin,
}

/// A composed message
#[derive(Debug, Clone)]
pub struct Email {
    pub subject: String,
    pub body: String,
}

/// Email mailer service
#[derive(Clone)]
pub struct Mailer {
    config: Option<EmailConfig>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    organization: String,
    base_url: String,
}

/// Build a transport from `smtp://[user:pass@]host[:port]`
fn build_transport(smtp_url: &str) -> PortalResult<AsyncSmtpTransport<Tokio1Executor>> {
    let without_scheme = smtp_url
        .strip_prefix("smtp://")
        .ok_or_else(|| PortalError::Email("SMTP URL must start with smtp://".to_string()))?;

    let (credentials, host_part) = match without_scheme.rsplit_once('@') {
        Some((creds, host)) => {
            let (username, password) = creds
                .split_once(':')
                .ok_or_else(|| PortalError::Email("Invalid SMTP URL format".to_string()))?;
            let username = urlencoding::decode(username)
                .map_err(|e| PortalError::Email(format!("Invalid SMTP username: {}", e)))?;
            let password = urlencoding::decode(password)
                .map_err(|e| PortalError::Email(format!("Invalid SMTP password: {}", e)))?;
            (
                Some(Credentials::new(username.into_owned(), password.into_owned())),
                host,
            )
        }
        None => (None, without_scheme),
    };

    let (host, port) = match host_part.split_once(':') {
        Some((h, p)) => (
            h,
            p.parse::<u16>()
                .map_err(|_| PortalError::Email(format!("Invalid SMTP port: {}", p)))?,
        ),
        None => (host_part, 587),
    };

    if host.is_empty() {
        return Err(PortalError::Email("SMTP host is empty".to_string()));
    }

    let transport = match credentials {
        Some(creds) => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| PortalError::Email(format!("SMTP setup failed: {}", e)))?
            .port(port)
            .credentials(creds)
            .build(),
        // Unauthenticated relays are local development servers
        None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build(),
    };

    Ok(transport)
}

impl Mailer {
    /// Create a new mailer
    pub fn new(
        config: Option<EmailConfig>,
        organization: impl Into<String>,
        base_url: impl Into<String>,
    ) -> PortalResult<Self> {
        let transport = match &config {
            Some(email_config) => Some(build_transport(&email_config.smtp_url)?),
            None => None,
        };

        Ok(Self {
            config,
            transport,
            organization: organization.into(),
            base_url: base_url.into(),
        })
    }

    /// Check if email is configured
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}{}?token={}", self.base_url, path, urlencoding::encode(token))
    }

    fn signature(&self) -> String {
        format!("Kind regards,\n{}", self.organization)
    }

    // ==================== Templates ====================

    pub fn verification_email(&self, name: &str, token: &str) -> Email {
        Email {
            subject: "Verify your email address".to_string(),
            body: format!(
                "Hello {},\n\nThank you for joining the {} portal.\n\nPlease verify your email address by opening the link below:\n\n{}\n\nThis link will expire in 24 hours. If you did not create this account, please ignore this email.\n\n{}\n",
                name,
                self.organization,
                self.link("/verify-email", token),
                self.signature()
            ),
        }
    }

    pub fn password_reset_email(&self, name: &str, token: &str) -> Email {
        Email {
            subject: "Reset your password".to_string(),
            body: format!(
                "Hello {},\n\nWe received a request to reset your password. To choose a new one, open the link below:\n\n{}\n\nThis link will expire in 1 hour and can only be used once. If you did not request a reset, your password will remain unchanged.\n\n{}\n",
                name,
                self.link("/reset-password", token),
                self.signature()
            ),
        }
    }

    pub fn registration_received_email(
        &self,
        name: &str,
        conference: &str,
        waitlisted: bool,
        amount_due_cents: i64,
        currency: &str,
    ) -> Email {
        let status_line = if waitlisted {
            "The conference is currently full, so you have been placed on the waitlist. We will email you if a seat becomes available."
        } else {
            "Your registration is pending review by the association."
        };
        let payment_line = if amount_due_cents > 0 {
            format!(
                "Amount due: {} {}. You can upload proof of payment from your registrations page.",
                format_amount(amount_due_cents),
                currency
            )
        } else {
            "There is no fee for this registration.".to_string()
        };

        Email {
            subject: format!("Registration received: {}", conference),
            body: format!(
                "Hello {},\n\nWe have received your registration for {}.\n\n{}\n\n{}\n\n{}\n",
                name,
                conference,
                status_line,
                payment_line,
                self.signature()
            ),
        }
    }

    pub fn registration_status_email(
        &self,
        name: &str,
        conference: &str,
        notice: RegistrationNotice,
        note: Option<&str>,
    ) -> Email {
        let (subject, message) = match notice {
            RegistrationNotice::Approved => (
                "Registration approved",
                "Your registration has been approved. We look forward to seeing you there.",
            ),
            RegistrationNotice::Rejected => (
                "Registration not approved",
                "Unfortunately your registration could not be approved.",
            ),
            RegistrationNotice::PromotedFromWaitlist => (
                "A seat is available",
                "A seat has become available and your registration has moved off the waitlist. It is now pending review.",
            ),
            RegistrationNotice::CancelledByAdmin => (
                "Registration cancelled",
                "Your registration has been cancelled by the association.",
            ),
        };

        let note = note
            .map(|n| format!("\n\nNote from the association: {}", n))
            .unwrap_or_default();

        Email {
            subject: format!("{}: {}", subject, conference),
            body: format!(
                "Hello {},\n\n{} ({}){}\n\n{}\n",
                name,
                message,
                conference,
                note,
                self.signature()
            ),
        }
    }

    pub fn payment_confirmed_email(
        &self,
        name: &str,
        conference: &str,
        amount_paid_cents: i64,
        currency: &str,
    ) -> Email {
        Email {
            subject: format!("Payment received: {}", conference),
            body: format!(
                "Hello {},\n\nWe have confirmed your payment of {} {} for {}. Thank you.\n\n{}\n",
                name,
                format_amount(amount_paid_cents),
                currency,
                conference,
                self.signature()
            ),
        }
    }

    pub fn payment_proof_rejected_email(
        &self,
        name: &str,
        conference: &str,
        note: Option<&str>,
    ) -> Email {
        let reason = note
            .map(|n| format!("\n\nReason: {}", n))
            .unwrap_or_default();

        Email {
            subject: format!("Payment proof not accepted: {}", conference),
            body: format!(
                "Hello {},\n\nWe could not verify the proof of payment you submitted for {}.{}\n\nPlease upload a new proof of payment from your registrations page.\n\n{}\n",
                name,
                conference,
                reason,
                self.signature()
            ),
        }
    }

    pub fn content_removed_email(&self, name: &str, content_kind: &str, note: Option<&str>) -> Email {
        let reason = note
            .map(|n| format!("\n\nModerator note: {}", n))
            .unwrap_or_default();

        Email {
            subject: format!("Your {} was removed", content_kind),
            body: format!(
                "Hello {},\n\nAfter reviewing a report from the community, a moderator has removed your {} from the blog.{}\n\n{}\n",
                name,
                content_kind,
                reason,
                self.signature()
            ),
        }
    }

    // ==================== Delivery ====================

    /// Send a composed email
    pub async fn send(&self, to: &str, email: Email) -> PortalResult<()> {
        let (Some(config), Some(transport)) = (&self.config, &self.transport) else {
            tracing::warn!(to = %to, subject = %email.subject, "Email not configured, skipping");
            return Ok(());
        };

        let message = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| PortalError::Email(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| PortalError::Email(format!("Invalid to address: {}", e)))?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| PortalError::Email(format!("Failed to build email: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| PortalError::Email(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %to, subject = %email.subject, "Sent email");
        Ok(())
    }

    /// Send without failing the caller
    pub async fn send_logged(&self, to: &str, email: Email) {
        let subject = email.subject.clone();
        if let Err(e) = self.send(to, email).await {
            tracing::warn!(to = %to, subject = %subject, error = %e, "Email delivery failed");
        }
    }
}

/// Cents as a decimal amount, e.g. 12550 -> "125.50"
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> Mailer {
        Mailer::new(None, "Fiji Principals Association", "https://portal.example").unwrap()
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(12550), "125.50");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(0), "0.00");
    }

    #[test]
    fn test_verification_link_is_encoded() {
        let email = mailer().verification_email("Mere", "a b+c");
        assert!(email
            .body
            .contains("https://portal.example/verify-email?token=a%20b%2Bc"));
        assert!(email.body.contains("Fiji Principals Association"));
    }

    #[test]
    fn test_registration_received_mentions_waitlist_and_amount() {
        let email = mailer().registration_received_email("Mere", "Annual Conference", true, 25000, "FJD");
        assert!(email.subject.contains("Annual Conference"));
        assert!(email.body.contains("waitlist"));
        assert!(email.body.contains("250.00 FJD"));

        let free = mailer().registration_received_email("Mere", "Annual Conference", false, 0, "FJD");
        assert!(free.body.contains("no fee"));
    }

    #[test]
    fn test_status_email_includes_note() {
        let email = mailer().registration_status_email(
            "Mere",
            "Annual Conference",
            RegistrationNotice::Rejected,
            Some("Registration is for principals only"),
        );
        assert!(email.body.contains("principals only"));
    }

    #[test]
    fn test_invalid_smtp_url() {
        assert!(build_transport("http://mail.example").is_err());
        assert!(build_transport("smtp://user@mail.example").is_err());
        assert!(build_transport("smtp://mail.example:notaport").is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_skips_sending() {
        let mailer = mailer();
        assert!(!mailer.is_configured());
        let email = mailer.password_reset_email("Mere", "token");
        assert!(mailer.send("mere@example.com", email).await.is_ok());
    }
}

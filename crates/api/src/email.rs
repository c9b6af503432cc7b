//! Transactional email
//!
//! Confirmation and password-reset mails through a Resend-style HTTP API.
//! Sending degrades to a warn log when no API key is configured, so local
//! development works without an email account.

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Base URL confirmation/reset links point at
    pub public_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env(public_url: &str) -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Membrio <noreply@localhost>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Membrio".to_string()),
            public_url: public_url.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Transactional mail service
#[derive(Clone)]
pub struct MailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl MailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(public_url: &str) -> Self {
        Self::new(EmailConfig::from_env(public_url))
    }

    /// Send an email via the Resend API
    async fn send_email(&self, to: &str, subject: &str, html: &str) {
        if !self.config.is_enabled() {
            tracing::warn!("Email not configured, skipping: {}", subject);
            return;
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(status = %status, body = %body, "Failed to send email");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email");
            }
        }
    }

    /// Send the account-confirmation mail with a single-use token link
    pub async fn send_confirmation(&self, to: &str, username: &str, token: &str) {
        let link = format!("{}/verify-email?token={}", self.config.public_url, token);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Welcome to {app_name}</h2>
    <p>Hi {username},</p>
    <p>Confirm your email address to activate your membership account. The link is valid for 24 hours.</p>
    <p>
        <a href="{link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Confirm my email
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">If you did not create this account, you can ignore this email.</p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            app_name = self.config.app_name,
            username = username,
            link = link,
        );

        self.send_email(
            to,
            &format!("Confirm your {} account", self.config.app_name),
            &html,
        )
        .await;
    }

    /// Send the password-reset mail with a single-use token link
    pub async fn send_password_reset(&self, to: &str, username: &str, token: &str) {
        let link = format!("{}/reset-password?token={}", self.config.public_url, token);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Password reset</h2>
    <p>Hi {username},</p>
    <p>Someone requested a password reset for your {app_name} account. The link is valid for 24 hours.</p>
    <p>
        <a href="{link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Choose a new password
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">If this wasn't you, your password is still safe and no action is needed.</p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            app_name = self.config.app_name,
            username = username,
            link = link,
        );

        self.send_email(
            to,
            &format!("Reset your {} password", self.config.app_name),
            &html,
        )
        .await;
    }
}

use async_trait::async_trait;

/// Delivery channel for one-time login codes. SMTP wiring lives outside this
/// service; the default implementation only logs.
#[async_trait]
pub trait OtpMailer: Send + Sync {
    async fn send_otp(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

pub struct LogMailer;

#[async_trait]
impl OtpMailer for LogMailer {
    async fn send_otp(&self, email: &str, code: &str) -> anyhow::Result<()> {
        tracing::info!(email = %email, code = %code, "otp code issued");
        Ok(())
    }
}

use std::env;

/// Application-level constants
pub const APP_NAME: &str = "Careflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info,careflow=debug".to_string()
}

/// Runtime configuration, read once from the environment at startup.
///
/// Missing oracle credentials are not an error: the pipeline runs
/// permanently on its deterministic fallbacks. Missing transport
/// credentials disable outbound delivery (replies are logged only).
#[derive(Debug, Clone)]
pub struct Config {
    /// Generative oracle API key. `None` = oracle unconfigured.
    pub oracle_api_key: Option<String>,
    /// Oracle REST endpoint base.
    pub oracle_base_url: String,
    /// Oracle model identifier.
    pub oracle_model: String,
    /// Messaging-channel access token.
    pub access_token: Option<String>,
    /// Business phone id for the outbound send endpoint.
    pub phone_id: Option<String>,
    /// Webhook verification token.
    pub verify_token: Option<String>,
    /// Whether the media (image/document) analysis path is enabled.
    pub media_enabled: bool,
    /// HTTP bind port for the webhook server.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            oracle_api_key: non_empty_var("GEMINI_API_KEY"),
            oracle_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            oracle_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash-latest".to_string()),
            access_token: non_empty_var("WHATSAPP_ACCESS_TOKEN"),
            phone_id: non_empty_var("WHATSAPP_BUSINESS_PHONE_ID"),
            verify_token: non_empty_var("WHATSAPP_VERIFY_TOKEN"),
            media_enabled: env::var("ENABLE_MEDIA").map(|v| v == "true").unwrap_or(false),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }

    /// Whether the generative oracle can be reached at all.
    pub fn oracle_configured(&self) -> bool {
        self.oracle_api_key.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

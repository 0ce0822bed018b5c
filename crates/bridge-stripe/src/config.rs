//! Stripe Client Configuration

/// Production API host
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// API version requested on every call and sent with `createEphemeralKey`
pub const DEFAULT_API_VERSION: &str = "2020-08-27";

/// Stripe REST client configuration
#[derive(Clone, Debug)]
pub struct StripeConfig {
    /// API host, overridable for tests and proxies
    pub api_base: String,

    /// Value of the `Stripe-Version` header
    pub api_version: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Where a redirect-based authentication returns to
    pub return_url: Option<String>,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            api_version: DEFAULT_API_VERSION.into(),
            timeout_secs: 30,
            return_url: None,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            api_base: std::env::var("STRIPE_API_BASE").unwrap_or(defaults.api_base),
            api_version: std::env::var("STRIPE_API_VERSION").unwrap_or(defaults.api_version),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            return_url: std::env::var("STRIPE_RETURN_URL").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_return_url(mut self, return_url: impl Into<String>) -> Self {
        self.return_url = Some(return_url.into());
        self
    }
}

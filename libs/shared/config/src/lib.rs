use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub auth_jwt_secret: String,
    pub qr_jwt_secret: String,
    pub esewa_secret_key: String,
    pub esewa_product_code: String,
    pub esewa_payment_url: String,
    pub esewa_status_url: String,
    pub app_base_url: String,
    pub consultation_fee: String,
    pub gateway_timeout_secs: u64,
    pub provisional_hold_minutes: i64,
    pub sweeper_interval_secs: u64,
    pub payment_poll_interval_secs: u64,
    pub payment_poll_min_age_secs: i64,
    pub auto_confirm_on_payment: bool,
    pub notification_webhook_url: Option<String>,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self {
            database_url: required("DATABASE_URL"),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10),
            auth_jwt_secret: required("AUTH_JWT_SECRET"),
            qr_jwt_secret: required("QR_JWT_SECRET"),
            esewa_secret_key: required("ESEWA_SECRET_KEY"),
            esewa_product_code: with_default("ESEWA_PRODUCT_CODE", "EPAYTEST"),
            esewa_payment_url: with_default(
                "ESEWA_PAYMENT_URL",
                "https://rc-epay.esewa.com.np/api/epay/main/v2/form",
            ),
            esewa_status_url: with_default(
                "ESEWA_STATUS_URL",
                "https://rc.esewa.com.np/api/epay/transaction/status/",
            ),
            app_base_url: with_default("APP_BASE_URL", "http://localhost:3000"),
            consultation_fee: with_default("CONSULTATION_FEE", "500.00"),
            gateway_timeout_secs: parsed("GATEWAY_TIMEOUT_SECS", 10),
            provisional_hold_minutes: parsed("PROVISIONAL_HOLD_MINUTES", 15),
            sweeper_interval_secs: parsed("SWEEPER_INTERVAL_SECS", 3600),
            payment_poll_interval_secs: parsed("PAYMENT_POLL_INTERVAL_SECS", 300),
            payment_poll_min_age_secs: parsed("PAYMENT_POLL_MIN_AGE_SECS", 1200),
            auto_confirm_on_payment: parsed("AUTO_CONFIRM_ON_PAYMENT", false),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            bind_addr: with_default("BIND_ADDR", "0.0.0.0:3000"),
        };

        config.sweeper_interval_secs = at_least_one("SWEEPER_INTERVAL_SECS", config.sweeper_interval_secs);
        config.payment_poll_interval_secs =
            at_least_one("PAYMENT_POLL_INTERVAL_SECS", config.payment_poll_interval_secs);
        config.payment_poll_min_age_secs =
            poll_min_age(config.payment_poll_min_age_secs, config.provisional_hold_minutes);

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.is_payment_configured() {
            warn!("Payment gateway not configured - bookings will be refused");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_url.is_empty()
            && !self.auth_jwt_secret.is_empty()
            && !self.qr_jwt_secret.is_empty()
    }

    pub fn is_payment_configured(&self) -> bool {
        !self.esewa_secret_key.is_empty()
            && !self.esewa_product_code.is_empty()
            && !self.esewa_status_url.is_empty()
    }
}

/// Tick intervals of zero are not allowed.
fn at_least_one(key: &str, secs: u64) -> u64 {
    if secs == 0 {
        warn!("{} must be at least 1 second, using 1", key);
        1
    } else {
        secs
    }
}

/// The poller must not look at a payment whose provisional hold is still running.
fn poll_min_age(min_age_secs: i64, hold_minutes: i64) -> i64 {
    let hold_secs = hold_minutes.saturating_mul(60);
    if min_age_secs < hold_secs {
        warn!(
            "PAYMENT_POLL_MIN_AGE_SECS ({}) is shorter than the provisional hold, using {}",
            min_age_secs, hold_secs
        );
        hold_secs
    } else {
        min_age_secs
    }
}

fn required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", key);
        String::new()
    })
}

fn with_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{} not set, using default", key);
        default.to_string()
    })
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an unparseable value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

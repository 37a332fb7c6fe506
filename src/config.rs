use crate::entities::Rarity;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub fees: FeeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...` or `memory://` for the in-process store
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory:")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64, // seconds
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

/// Roll engine tuning and per-tier overrides of the built-in rarity table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Redraws allowed after losing a decrement race within one roll
    pub max_roll_attempts: u32,
    /// Number of earliest users eligible for earlydays emotes
    pub early_adopter_cohort: u64,
    /// Consecutive persistence failures after which a donation stops rolling
    pub max_consecutive_failures: u32,
    pub tiers: Vec<TierRule>,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_roll_attempts: 5,
            early_adopter_cohort: 100,
            max_consecutive_failures: 3,
            tiers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRule {
    pub rarity: Rarity,
    /// Roll chance in percent (relative weight, not renormalised)
    pub roll_chance: Option<f64>,
    /// Default max instances for new emotes of this tier (0 = unlimited)
    pub max_instances: Option<i64>,
}

/// Fee and revenue split settings. Rates are basis points (1% = 100bp).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub processor_rate_bp: i64,
    pub processor_fixed_cents: i64,
    pub recipient_bp: i64,
    pub platform_bp: i64,
    pub artist_bp: i64,
    pub min_donation_cents: i64,
    /// Largest accepted single payment (Stripe's per-charge ceiling)
    pub max_donation_cents: i64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            processor_rate_bp: 290,
            processor_fixed_cents: 30,
            recipient_bp: 9000,
            platform_bp: 500,
            artist_bp: 500,
            min_donation_cents: 100,
            max_donation_cents: 99_999_999,
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.recipient_bp + self.platform_bp + self.artist_bp != 10_000 {
            return Err(format!(
                "fee split must sum to 10000bp, got {}",
                self.recipient_bp + self.platform_bp + self.artist_bp
            ));
        }
        if self.max_donation_cents < self.min_donation_cents {
            return Err("max_donation_cents must not be below min_donation_cents".to_string());
        }
        if self.processor_rate_bp < 0 || self.processor_fixed_cents < 0 {
            return Err("processor fees must not be negative".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // Without a config file everything comes from the environment
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => {
                toml::from_str(&config_str).map_err(|e| format!("Failed to parse config file: {e}"))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                let database_url = get_env("DATABASE_URL")
                    .ok_or("DATABASE_URL is not set and no config.toml was found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                        access_token_expires_in: get_env_parse("JWT_ACCESS_EXPIRES_IN", 7200i64),
                    },
                    stripe: StripeConfig::default(),
                    allocation: AllocationConfig::default(),
                    fees: FeeConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("Cannot read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        config.fees.validate()?;

        Ok(config)
    }

    /// Defaults over the in-process store, no Stripe secrets
    pub fn in_memory(jwt_secret: &str) -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "memory://".to_string(),
                max_connections: 1,
            },
            jwt: JwtConfig {
                secret: jwt_secret.to_string(),
                access_token_expires_in: 7200,
            },
            stripe: StripeConfig::default(),
            allocation: AllocationConfig::default(),
            fees: FeeConfig::default(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("JWT_ACCESS_EXPIRES_IN")
            && let Ok(n) = v.parse()
        {
            self.jwt.access_token_expires_in = n;
        }
        if let Ok(v) = env::var("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = v;
        }
        if let Ok(v) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = v;
        }
        if let Ok(v) = env::var("ALLOCATION_MAX_ROLL_ATTEMPTS")
            && let Ok(n) = v.parse()
        {
            self.allocation.max_roll_attempts = n;
        }
        if let Ok(v) = env::var("EARLY_ADOPTER_COHORT")
            && let Ok(n) = v.parse()
        {
            self.allocation.early_adopter_cohort = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_toml_uses_defaults() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            url = "memory://"
            max_connections = 1

            [jwt]
            secret = "s"
            access_token_expires_in = 60
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.database.is_memory());
        assert_eq!(config.allocation.max_roll_attempts, 5);
        assert_eq!(config.allocation.early_adopter_cohort, 100);
        assert_eq!(config.fees.processor_rate_bp, 290);
        assert!(config.fees.validate().is_ok());
    }

    #[test]
    fn test_parse_tier_overrides() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            url = "postgres://localhost/emoterush"
            max_connections = 5

            [jwt]
            secret = "s"
            access_token_expires_in = 60

            [allocation]
            early_adopter_cohort = 10

            [[allocation.tiers]]
            rarity = "legendary"
            roll_chance = 0.5
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(!config.database.is_memory());
        assert_eq!(config.allocation.early_adopter_cohort, 10);
        assert_eq!(config.allocation.max_roll_attempts, 5);
        assert_eq!(config.allocation.tiers.len(), 1);
        assert_eq!(config.allocation.tiers[0].rarity, Rarity::Legendary);
        assert_eq!(config.allocation.tiers[0].max_instances, None);
    }

    #[test]
    fn test_fee_split_must_cover_whole_net() {
        let fees = FeeConfig {
            artist_bp: 600,
            ..FeeConfig::default()
        };
        assert!(fees.validate().is_err());
    }
}

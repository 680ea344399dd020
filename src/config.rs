use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: String,

    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    /// Estimated minutes a doctor spends per patient.
    #[envconfig(from = "CONSULTATION_MINUTES", default = "7")]
    pub consultation_minutes: u32,

    /// How many places ahead of their turn a waiting patient is alerted.
    #[envconfig(from = "NOTIFY_AHEAD", default = "2")]
    pub notify_ahead: usize,

    #[envconfig(from = "NOTIFY_CRON", default = "0 * * * * *")]
    pub notify_cron: String,

    #[envconfig(from = "NO_SHOW_CRON", default = "0 0 20 * * *")]
    pub no_show_cron: String,
}

impl Config {
    pub fn settings(&self) -> Settings {
        Settings {
            consultation_minutes: self.consultation_minutes,
            notify_ahead: self.notify_ahead,
        }
    }
}

/// The part of the configuration the services need at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub consultation_minutes: u32,
    pub notify_ahead: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            consultation_minutes: 7,
            notify_ahead: 2,
        }
    }
}

/// Configuration of the `seed` binary.
#[derive(Envconfig, Debug, Clone)]
pub struct SeedConfig {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "SEED_ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    #[envconfig(from = "SEED_ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    #[envconfig(from = "SEED_ADMIN_NAME", default = "Hospital Administrator")]
    pub admin_name: String,
}

use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // address and port that the app will bind to
    #[clap(long, env, default_value = "0.0.0.0")]
    pub host: String,

    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // small document that holds the current upstream domain as `src = "<url>"`, the site rotates
    // domains so this is checked on startup and every time recovery kicks in
    #[clap(
        long,
        env,
        default_value = "https://raw.githubusercontent.com/thecrewwh/dl_url/refs/heads/main/dl.xml"
    )]
    pub bootstrap_url: String,

    // used when the bootstrap document can't be read or doesn't have a usable url
    #[clap(long, env, default_value = "https://daddylivestream.com")]
    pub default_origin: String,

    // how long a resolved stream stays valid, upstream tokens die somewhere past 7 minutes
    #[clap(long, env, default_value = "420")]
    pub cache_ttl_secs: u64,

    #[clap(long, env, default_value = "5")]
    pub connect_timeout_secs: u64,

    // per read timeout for proxied manifests and segments
    #[clap(long, env, default_value = "30")]
    pub read_timeout_secs: u64,

    // whole request timeout for each hop of the resolution chain
    #[clap(long, env, default_value = "10")]
    pub resolve_timeout_secs: u64,

    // retries for connection errors and 5xx responses, the backoff doubles per attempt
    #[clap(long, env, default_value = "5")]
    pub upstream_max_retries: u32,

    #[clap(long, env, default_value = "500")]
    pub upstream_retry_base_ms: u64,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.upstream_retry_base_ms)
    }
}

impl Default for AppConfig {
    // mirrors the clap defaults, mostly used by tests
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            host: "0.0.0.0".to_string(),
            port: 5000,
            bootstrap_url:
                "https://raw.githubusercontent.com/thecrewwh/dl_url/refs/heads/main/dl.xml"
                    .to_string(),
            default_origin: "https://daddylivestream.com".to_string(),
            cache_ttl_secs: 420,
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
            resolve_timeout_secs: 10,
            upstream_max_retries: 5,
            upstream_retry_base_ms: 500,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
        }
    }
}

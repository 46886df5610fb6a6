use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Quiet the SQL and connection chatter unless `RUST_LOG` says otherwise.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,tokio_cron_scheduler=warn";

/// Where scheduler logs go. Every line is labelled with the node that wrote it.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub node_id: String,
    pub directives: String,
    pub loki_enabled: bool,
    pub loki_url: Option<String>,
    pub service_name: String,
    pub environment: String,
}

impl LoggingConfig {
    pub fn from_env(node_id: &str) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            node_id: node_id.to_string(),
            directives: var("RUST_LOG").unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string()),
            loki_enabled: var("LOKI_ENABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            loki_url: var("LOKI_URL"),
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "money-scheduler".to_string()),
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.loki_enabled && self.loki_url.is_none() {
            return Err("LOKI_ENABLED is true but LOKI_URL is not set".to_string());
        }
        EnvFilter::try_new(&self.directives)
            .map(|_| ())
            .map_err(|e| format!("Invalid log directives '{}': {}", self.directives, e))
    }
}

pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let filter = EnvFilter::try_new(&config.directives)?;

    #[cfg(feature = "loki")]
    let loki = match (config.loki_enabled, config.loki_url.as_deref()) {
        (true, Some(loki_url)) => Some(loki_layer(&config, loki_url)?),
        _ => None,
    };
    #[cfg(not(feature = "loki"))]
    let loki: Option<tracing_subscriber::layer::Identity> = None;

    let shipping = loki.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(loki)
        .init();

    tracing::info!(
        "📊 Logging ready for node {} ({}, loki {})",
        config.node_id,
        config.environment,
        if shipping { "on" } else { "off" }
    );
    Ok(())
}

#[cfg(feature = "loki")]
fn loki_layer(config: &LoggingConfig, loki_url: &str) -> Result<tracing_loki::Layer, Box<dyn std::error::Error>> {
    let (layer, task) = tracing_loki::builder()
        .label("service", &config.service_name)?
        .label("environment", &config.environment)?
        .label("node", &config.node_id)?
        .build_url(url::Url::parse(loki_url)?)?;

    // Ships buffered lines to Loki in the background.
    tokio::spawn(task);
    Ok(layer)
}

use figment::{Figment, providers::{Env, Format, Json, Serialized, Toml}};
use figment::value::Uncased;
use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;
use crate::core::error::NgError;
use crate::faas::report::ReportKind;

pub mod settings;

pub use settings::{
    AuthConfig, BudgetConfig, CalendarConfig, EndpointConfig, FaasConfig, FilterConfig,
    OutputConfig, PageLimits, PollingConfig, ScopeConfig, TicketConfig,
};

/// Variable names used by the deployment's existing `.env` files, mapped onto the config tree.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("AUTH_URL", "auth.url"),
    ("CLIENT_ID", "auth.client_id"),
    ("CLIENT_SECRET", "auth.client_secret"),
    ("GRANT_TYPE", "auth.grant_type"),
    ("SCOPE_CARTEIRA", "auth.scopes.portfolio"),
    ("SCOPE_PATRIMONIO", "auth.scopes.profitability"),
    ("SCOPE_EXTRATO", "auth.scopes.cash_statement"),
    ("TICKET_URL", "endpoints.poll_url"),
    ("PORTFOLIO_URL", "endpoints.portfolio_url"),
    ("RENTABILIDADE_URL", "endpoints.profitability_url"),
    ("EXTRATO_URL", "endpoints.cash_statement_url"),
    ("OUTPUT_DIR_BASE", "output.base_dir"),
];

pub struct ConfigManager {
    current: ArcSwap<FaasConfig>,
    source_info: String,
}

impl ConfigManager {
    /// Layering: defaults < legacy env names < optional file < `FAAS_` env vars.
    pub fn figment(path: Option<&Path>) -> Figment {
        let legacy = Env::raw().filter_map(|key| {
            LEGACY_ENV
                .iter()
                .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                .map(|(_, target)| Uncased::from(*target))
        });

        let mut figment = Figment::from(Serialized::defaults(FaasConfig::default())).merge(legacy);

        if let Some(path) = path {
            let is_json = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            figment = if is_json {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        figment.merge(Env::prefixed("FAAS_").split("__"))
    }

    /// Loads the layered configuration. Fails if an explicit file is missing.
    pub fn load(path: Option<&Path>) -> Result<Self, NgError> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(NgError::ConfigError(format!("Local file not found: {}", p.display())));
            }
        }

        let data: FaasConfig = Self::figment(path)
            .extract()
            .map_err(|e| NgError::ConfigError(e.to_string()))?;

        let source_info = match path {
            Some(p) => format!("local:{}", p.display()),
            None => "env".to_string(),
        };

        Ok(Self {
            current: ArcSwap::from_pointee(data),
            source_info,
        })
    }

    pub fn from_config(config: FaasConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            source_info: "inline".to_string(),
        }
    }

    pub fn get(&self) -> Arc<FaasConfig> {
        self.current.load_full()
    }

    pub fn source_info(&self) -> &str {
        &self.source_info
    }

    /// Loads and validates in one step; the returned snapshot is ready for the pipeline.
    pub fn load_for(path: Option<&Path>, kind: ReportKind) -> Result<Arc<FaasConfig>, NgError> {
        let manager = Self::load(path)?;
        let config = manager.get();
        config.validate(kind)?;
        Ok(config)
    }
}

impl FaasConfig {
    /// Checks every key `kind` needs and reports all problems in one error.
    pub fn validate(&self, kind: ReportKind) -> Result<(), NgError> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();

        let required = [
            ("auth.url", self.auth.url.as_deref()),
            ("auth.client_id", self.auth.client_id.as_deref()),
            ("auth.client_secret", self.auth.client_secret.as_deref()),
            ("endpoints.poll_url", self.endpoints.poll_url.as_deref()),
        ];
        for (key, value) in required {
            if value.map(str::trim).unwrap_or("").is_empty() {
                missing.push(key.to_string());
            }
        }

        let scope_key = format!("auth.scopes.{}", scope_field(kind));
        if self.auth.scopes.for_kind(kind).map(str::trim).unwrap_or("").is_empty() {
            missing.push(scope_key);
        }
        if self.endpoints.ticket_url(kind).map(str::trim).unwrap_or("").is_empty() {
            missing.push(format!("endpoints.{}_url", scope_field(kind)));
        }

        if self.auth.max_attempts == 0 {
            invalid.push("auth.max_attempts must be at least 1".to_string());
        }
        if self.ticket.max_attempts == 0 {
            invalid.push("ticket.max_attempts must be at least 1".to_string());
        }
        if self.polling.absence_streak == 0 {
            invalid.push("polling.absence_streak must be at least 1".to_string());
        }
        if self.polling.aging_after_days > self.polling.stale_after_days {
            invalid.push("polling.aging_after_days must not exceed polling.stale_after_days".to_string());
        }
        for (name, budget) in [
            ("stale", &self.polling.stale),
            ("aging", &self.polling.aging),
            ("fresh", &self.polling.fresh),
        ] {
            if budget.max_attempts == 0 {
                invalid.push(format!("polling.{}.max_attempts must be at least 1", name));
            }
        }
        if self.pages.for_kind(kind) == 0 {
            invalid.push(format!("pages.{} must be at least 1", scope_field(kind)));
        }
        if self.calendar.timezone.parse::<chrono_tz::Tz>().is_err() {
            invalid.push(format!("calendar.timezone '{}' is not an IANA zone", self.calendar.timezone));
        }

        if missing.is_empty() && invalid.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing keys: {}", missing.join(", ")));
        }
        parts.extend(invalid);
        Err(NgError::ConfigError(parts.join("; ")))
    }
}

fn scope_field(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Portfolio => "portfolio",
        ReportKind::Profitability => "profitability",
        ReportKind::CashStatement => "cash_statement",
    }
}

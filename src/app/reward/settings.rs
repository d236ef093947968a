//! Reward settings, point-source registry and reward teams.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::app::config::RewardConfig;
use crate::domain::{
    AppError, DatabaseError, RewardBudgetType, RewardPlugin, RewardSettings, RewardStore,
    RewardTeam, RewardTimeZone, ValidationError, parse_time_zone,
};

/// Holds the current settings snapshot and the live point sources.
///
/// Stored settings are read once and refreshed only through [`Self::reload`].
/// The stored `enabled` flag of a plugin is never trusted: reads overlay the
/// state of the registered plugin, and unregistered plugins read as disabled.
pub struct RewardSettingsService {
    store: Arc<dyn RewardStore>,
    defaults: RewardSettings,
    settings: RwLock<RewardSettings>,
    plugins: RwLock<BTreeMap<String, Arc<dyn RewardPlugin>>>,
}

impl RewardSettingsService {
    #[must_use]
    pub fn new(store: Arc<dyn RewardStore>, config: &RewardConfig) -> Self {
        let defaults = RewardSettings {
            period_type: config.default_period_type,
            time_zone: config.default_time_zone.clone(),
            plugin_settings: Vec::new(),
        };
        Self {
            store,
            settings: RwLock::new(defaults.clone()),
            defaults,
            plugins: RwLock::new(BTreeMap::new()),
        }
    }

    /// Re-reads the stored settings, falling back to the configured defaults.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<RewardSettings, AppError> {
        let loaded = match self.store.load_settings().await? {
            Some(settings) => match settings.validate() {
                Ok(()) => settings,
                Err(e) => {
                    warn!(error = %e, "Stored reward settings are invalid, using defaults");
                    self.defaults.clone()
                }
            },
            None => self.defaults.clone(),
        };
        *self.settings.write().await = loaded.clone();
        info!(
            period_type = %loaded.period_type,
            time_zone = %loaded.time_zone,
            plugins = loaded.plugin_settings.len(),
            "Reward settings loaded"
        );
        Ok(loaded)
    }

    /// Current settings with live plugin enablement.
    pub async fn get_settings(&self) -> RewardSettings {
        let mut settings = self.settings.read().await.clone();
        let plugins = self.plugins.read().await;
        for plugin_settings in &mut settings.plugin_settings {
            plugin_settings.enabled = plugins
                .get(&plugin_settings.plugin_id)
                .map(|p| p.is_enabled())
                .unwrap_or(false);
        }
        settings
    }

    #[instrument(skip(self, settings))]
    pub async fn save_settings(&self, settings: RewardSettings) -> Result<RewardSettings, AppError> {
        settings.validate()?;
        self.store.save_settings(&settings).await?;
        *self.settings.write().await = settings;
        info!("Reward settings saved");
        Ok(self.get_settings().await)
    }

    pub async fn register_plugin(&self, plugin: Arc<dyn RewardPlugin>) {
        let id = plugin.plugin_id().to_string();
        info!(plugin = %id, "Reward plugin registered");
        self.plugins.write().await.insert(id, plugin);
    }

    pub async fn unregister_plugin(&self, plugin_id: &str) -> bool {
        self.plugins.write().await.remove(plugin_id).is_some()
    }

    /// Registered plugins in ascending id order
    pub async fn plugins(&self) -> Vec<Arc<dyn RewardPlugin>> {
        self.plugins.read().await.values().cloned().collect()
    }

    pub async fn list_teams(&self) -> Result<Vec<RewardTeam>, AppError> {
        let mut teams = self.store.list_teams().await?;
        teams.sort_by_key(|t| t.id);
        Ok(teams)
    }

    #[instrument(skip(self, team), fields(name = %team.name))]
    pub async fn save_team(&self, team: RewardTeam) -> Result<RewardTeam, AppError> {
        team.validate()
            .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
        if team.budget.is_sign_negative() && !team.budget.is_zero() {
            return Err(AppError::invalid_field("budget", "negative team budget"));
        }
        if team.reward_type == RewardBudgetType::FixedPerPoint {
            return Err(AppError::invalid_field(
                "reward_type",
                "teams use a fixed, per-member or computed budget",
            ));
        }
        if team.id == Some(0) {
            return Err(AppError::invalid_field("id", "team id 0 is reserved"));
        }
        self.store.save_team(&team).await
    }

    /// Soft-deletes a team, keeping it for reward history.
    #[instrument(skip(self))]
    pub async fn remove_team(&self, id: i64) -> Result<RewardTeam, AppError> {
        let mut team = self
            .store
            .find_team(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("team {}", id))))?;
        team.deleted = true;
        self.store.save_team(&team).await
    }

    /// Validates the configured zone of the current settings.
    pub async fn time_zone(&self) -> Result<RewardTimeZone, AppError> {
        parse_time_zone(&self.settings.read().await.time_zone)
    }
}

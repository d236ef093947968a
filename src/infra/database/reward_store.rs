//! PostgreSQL storage of reward settings, teams and period reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, postgres::PgRow};
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::postgres::{PostgresClient, parse_column};
use crate::domain::{
    AppError, DatabaseError, RewardPeriod, RewardPluginSettings, RewardReport, RewardSettings,
    RewardStatus, RewardStore, RewardTeam, RewardTeamMember,
};

fn query_error(e: sqlx::Error) -> AppError {
    AppError::Database(DatabaseError::Query(e.to_string()))
}

fn median_instant(period: &RewardPeriod) -> DateTime<Utc> {
    DateTime::from_timestamp(period.median_seconds(), 0).unwrap_or(period.start)
}

impl PostgresClient {
    fn row_to_period(row: &PgRow) -> Result<RewardPeriod, AppError> {
        Ok(RewardPeriod {
            period_type: parse_column(row, "period_type")?,
            time_zone: row.get("time_zone"),
            start: row.get("start_time"),
            end: row.get("end_time"),
        })
    }

    fn row_to_team(row: &PgRow) -> Result<RewardTeam, AppError> {
        Ok(RewardTeam {
            id: Some(row.get("id")),
            name: row.get("name"),
            description: row.get("description"),
            manager_identity_id: row.get("manager_identity_id"),
            members: Vec::new(),
            budget: row.get("budget"),
            reward_type: parse_column(row, "reward_type")?,
            disabled: row.get("disabled"),
            deleted: row.get("deleted"),
        })
    }

    async fn attach_members(&self, teams: &mut [RewardTeam]) -> Result<(), AppError> {
        let ids: Vec<i64> = teams.iter().filter_map(|t| t.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let rows = sqlx::query(
            "SELECT team_id, identity_id FROM reward_team_members WHERE team_id = ANY($1) ORDER BY identity_id ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        let mut members: HashMap<i64, Vec<RewardTeamMember>> = HashMap::new();
        for row in &rows {
            members
                .entry(row.get("team_id"))
                .or_default()
                .push(RewardTeamMember {
                    identity_id: row.get("identity_id"),
                });
        }
        for team in teams.iter_mut() {
            if let Some(id) = team.id {
                team.members = members.remove(&id).unwrap_or_default();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RewardStore for PostgresClient {
    #[instrument(skip(self))]
    async fn load_settings(&self) -> Result<Option<RewardSettings>, AppError> {
        let row = sqlx::query("SELECT period_type, time_zone FROM reward_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let plugin_rows = sqlx::query(
            r#"
            SELECT plugin_id, enabled, budget_type, amount, threshold, use_pools
            FROM reward_plugin_settings
            ORDER BY plugin_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        let plugin_settings = plugin_rows
            .iter()
            .map(|r| {
                Ok(RewardPluginSettings {
                    plugin_id: r.get("plugin_id"),
                    enabled: r.get("enabled"),
                    budget_type: parse_column(r, "budget_type")?,
                    amount: r.get("amount"),
                    threshold: r.get("threshold"),
                    use_pools: r.get("use_pools"),
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Some(RewardSettings {
            period_type: parse_column(&row, "period_type")?,
            time_zone: row.get("time_zone"),
            plugin_settings,
        }))
    }

    #[instrument(skip(self, settings))]
    async fn save_settings(&self, settings: &RewardSettings) -> Result<(), AppError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        sqlx::query(
            r#"
            INSERT INTO reward_settings (id, period_type, time_zone, updated_at)
            VALUES (1, $1, $2, NOW())
            ON CONFLICT (id) DO UPDATE
            SET period_type = EXCLUDED.period_type, time_zone = EXCLUDED.time_zone, updated_at = NOW()
            "#,
        )
        .bind(settings.period_type.as_str())
        .bind(&settings.time_zone)
        .execute(&mut *db_tx)
        .await
        .map_err(query_error)?;

        sqlx::query("DELETE FROM reward_plugin_settings")
            .execute(&mut *db_tx)
            .await
            .map_err(query_error)?;

        for plugin in &settings.plugin_settings {
            sqlx::query(
                r#"
                INSERT INTO reward_plugin_settings
                    (plugin_id, enabled, budget_type, amount, threshold, use_pools)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&plugin.plugin_id)
            .bind(plugin.enabled)
            .bind(plugin.budget_type.as_str())
            .bind(plugin.amount)
            .bind(plugin.threshold)
            .bind(plugin.use_pools)
            .execute(&mut *db_tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        }

        db_tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_teams(&self) -> Result<Vec<RewardTeam>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, manager_identity_id, budget, reward_type, disabled, deleted
            FROM reward_teams
            WHERE deleted = FALSE
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        let mut teams = rows
            .iter()
            .map(Self::row_to_team)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_members(&mut teams).await?;
        Ok(teams)
    }

    #[instrument(skip(self))]
    async fn find_team(&self, id: i64) -> Result<Option<RewardTeam>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, manager_identity_id, budget, reward_type, disabled, deleted
            FROM reward_teams
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut teams = vec![Self::row_to_team(&row)?];
        self.attach_members(&mut teams).await?;
        Ok(teams.pop())
    }

    #[instrument(skip(self, team), fields(name = %team.name))]
    async fn save_team(&self, team: &RewardTeam) -> Result<RewardTeam, AppError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        let row = match team.id {
            Some(id) => sqlx::query(
                r#"
                UPDATE reward_teams
                SET name = $2, description = $3, manager_identity_id = $4, budget = $5,
                    reward_type = $6, disabled = $7, deleted = $8
                WHERE id = $1
                RETURNING id
                "#,
            )
            .bind(id),
            None => sqlx::query(
                r#"
                INSERT INTO reward_teams
                    (name, description, manager_identity_id, budget, reward_type, disabled, deleted)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            ),
        }
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.manager_identity_id)
        .bind(team.budget)
        .bind(team.reward_type.as_str())
        .bind(team.disabled)
        .bind(team.deleted)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(query_error)?
        .ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!(
                "team {}",
                team.id.unwrap_or_default()
            )))
        })?;
        let id: i64 = row.get("id");

        sqlx::query("DELETE FROM reward_team_members WHERE team_id = $1")
            .bind(id)
            .execute(&mut *db_tx)
            .await
            .map_err(query_error)?;
        for member in &team.members {
            sqlx::query(
                "INSERT INTO reward_team_members (team_id, identity_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(member.identity_id)
            .execute(&mut *db_tx)
            .await
            .map_err(query_error)?;
        }

        db_tx.commit().await.map_err(query_error)?;

        let mut saved = team.clone();
        saved.id = Some(id);
        Ok(saved)
    }

    #[instrument(skip(self, period), fields(start = %period.start))]
    async fn find_period_status(
        &self,
        period: &RewardPeriod,
    ) -> Result<Option<RewardStatus>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT status FROM reward_periods
            WHERE period_type = $1 AND start_time <= $2 AND end_time > $2
            ORDER BY start_time DESC
            LIMIT 1
            "#,
        )
        .bind(period.period_type.as_str())
        .bind(median_instant(period))
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        row.as_ref()
            .map(|r| parse_column(r, "status"))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn find_periods_by_status(
        &self,
        status: RewardStatus,
    ) -> Result<Vec<RewardPeriod>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT period_type, time_zone, start_time, end_time FROM reward_periods
            WHERE status = $1
            ORDER BY start_time ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        rows.iter().map(Self::row_to_period).collect()
    }

    #[instrument(skip(self, period), fields(start = %period.start))]
    async fn reward_transaction_hashes(
        &self,
        period: &RewardPeriod,
    ) -> Result<HashMap<i64, String>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT e.identity_id, e.transaction_hash
            FROM reward_entries e
            JOIN reward_periods p ON p.id = e.period_id
            WHERE p.period_type = $1 AND p.start_time <= $2 AND p.end_time > $2
              AND e.transaction_hash IS NOT NULL
            "#,
        )
        .bind(period.period_type.as_str())
        .bind(median_instant(period))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(rows
            .iter()
            .map(|r| (r.get("identity_id"), r.get("transaction_hash")))
            .collect())
    }

    #[instrument(skip(self, report), fields(start = %report.period.start, status = %status))]
    async fn save_report(
        &self,
        report: &RewardReport,
        status: RewardStatus,
    ) -> Result<(), AppError> {
        let period = &report.period;
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        let period_row = sqlx::query(
            r#"
            INSERT INTO reward_periods (period_type, time_zone, start_time, end_time, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (period_type, start_time) DO UPDATE
            SET time_zone = EXCLUDED.time_zone, end_time = EXCLUDED.end_time,
                status = EXCLUDED.status, updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(period.period_type.as_str())
        .bind(&period.time_zone)
        .bind(period.start)
        .bind(period.end)
        .bind(status.as_str())
        .fetch_one(&mut *db_tx)
        .await
        .map_err(query_error)?;
        let period_id: i64 = period_row.get("id");

        for reward in &report.rewards {
            let entry_row = sqlx::query(
                r#"
                INSERT INTO reward_entries
                    (period_id, identity_id, enabled, tokens_to_send, tokens_sent, transaction_hash)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (period_id, identity_id) DO UPDATE
                SET enabled = EXCLUDED.enabled, tokens_to_send = EXCLUDED.tokens_to_send,
                    tokens_sent = EXCLUDED.tokens_sent,
                    transaction_hash = COALESCE(EXCLUDED.transaction_hash, reward_entries.transaction_hash)
                RETURNING id
                "#,
            )
            .bind(period_id)
            .bind(reward.identity_id)
            .bind(reward.is_enabled())
            .bind(reward.tokens_to_send())
            .bind(reward.tokens_sent())
            .bind(reward.transaction.as_ref().and_then(|tx| tx.hash.clone()))
            .fetch_one(&mut *db_tx)
            .await
            .map_err(query_error)?;
            let entry_id: i64 = entry_row.get("id");

            sqlx::query("DELETE FROM reward_entry_plugins WHERE entry_id = $1")
                .bind(entry_id)
                .execute(&mut *db_tx)
                .await
                .map_err(query_error)?;
            for plugin in &reward.rewards {
                sqlx::query(
                    r#"
                    INSERT INTO reward_entry_plugins (entry_id, plugin_id, points, amount, pools_used)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(entry_id)
                .bind(&plugin.plugin_id)
                .bind(plugin.points)
                .bind(plugin.amount)
                .bind(plugin.pools_used)
                .execute(&mut *db_tx)
                .await
                .map_err(query_error)?;
            }

            sqlx::query("DELETE FROM reward_entry_teams WHERE entry_id = $1")
                .bind(entry_id)
                .execute(&mut *db_tx)
                .await
                .map_err(query_error)?;
            for team in &reward.teams {
                sqlx::query(
                    "INSERT INTO reward_entry_teams (entry_id, team_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(entry_id)
                .bind(team.id)
                .execute(&mut *db_tx)
                .await
                .map_err(query_error)?;
            }
        }

        db_tx.commit().await.map_err(query_error)?;
        debug!(entries = report.rewards.len(), "Reward report stored");
        Ok(())
    }

    #[instrument(skip(self, period), fields(start = %period.start))]
    async fn link_reward_transaction(
        &self,
        period: &RewardPeriod,
        identity_id: i64,
        hash: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            WITH period AS (
                INSERT INTO reward_periods (period_type, time_zone, start_time, end_time, status, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (period_type, start_time) DO UPDATE SET updated_at = NOW()
                RETURNING id
            )
            INSERT INTO reward_entries (period_id, identity_id, transaction_hash)
            SELECT id, $6, $7 FROM period
            ON CONFLICT (period_id, identity_id) DO UPDATE
            SET transaction_hash = EXCLUDED.transaction_hash
            "#,
        )
        .bind(period.period_type.as_str())
        .bind(&period.time_zone)
        .bind(period.start)
        .bind(period.end)
        .bind(RewardStatus::Pending.as_str())
        .bind(identity_id)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        debug!(identity_id, hash = %hash, "Reward entry linked to transaction");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn replace_reward_transaction_hash(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<u64, AppError> {
        let result =
            sqlx::query("UPDATE reward_entries SET transaction_hash = $2 WHERE transaction_hash = $1")
                .bind(old_hash)
                .bind(new_hash)
                .execute(&self.pool)
                .await
                .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}

//! Hourly cron job that deletes API tokens past their expiry.

use std::str::FromStr;

use apalis::prelude::*;
use apalis_cron::Schedule;

use super::context::PurgeTokensContext;

/// apalis-cron builds one of these per tick.
#[derive(Default, Debug, Clone)]
pub struct PurgeExpiredTokensJob;

impl From<chrono::DateTime<chrono::Utc>> for PurgeExpiredTokensJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_purge_expired_tokens_job(
    _job: PurgeExpiredTokensJob,
    ctx: Data<PurgeTokensContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.tokens.purge_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                target = "willow::application::jobs::purge_tokens",
                purged = count,
                "Purged expired API tokens"
            );
        }
        Err(err) => {
            tracing::warn!(
                target = "willow::application::jobs::purge_tokens",
                error = %err,
                "Failed to purge expired API tokens"
            );
        }
        _ => {}
    }
    Ok(())
}

/// Top of every hour.
pub fn purge_expired_tokens_schedule() -> Schedule {
    Schedule::from_str("0 0 * * * *").expect("hourly cron expression parses")
}

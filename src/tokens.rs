use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{error, info};

use crate::config::TokenPolicy;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::model::TokenRecord;
use crate::schema::tokens::dsl;

const TOKEN_LENGTH: usize = 50;

/// A random alphanumeric bearer token from the thread-local CSPRNG.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Short-lived bearer tokens that stand in for a verified purchase.
#[derive(Clone)]
pub struct TokenStore {
    pool: DbPool,
    policy: TokenPolicy,
}

impl TokenStore {
    pub fn new(pool: DbPool, policy: TokenPolicy) -> Self {
        Self { pool, policy }
    }

    fn is_expiring(&self, time_expired: NaiveDateTime, now: NaiveDateTime) -> bool {
        let remaining = time_expired - now;
        remaining
            < chrono::Duration::from_std(self.policy.renew_window)
                .unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Issue a token for `user_key` if it has none, or replace one that is about to expire.
    ///
    /// Returns `None` when the current token is still good, in which case the
    /// caller should not send anything new to the client.
    pub fn issue_or_rotate(&self, user_key: &str) -> AppResult<Option<String>> {
        if user_key.is_empty() {
            return Err(AppError::Invalid("user key is required".to_string()));
        }

        let mut conn = self.pool.get()?;
        let now = Utc::now().naive_utc();

        let current: Option<TokenRecord> = dsl::tokens
            .filter(dsl::pro_order_id.eq(user_key))
            .order(dsl::time_expired.desc())
            .select(TokenRecord::as_select())
            .first(&mut conn)
            .optional()?;

        match current {
            None => {
                info!(user_key, "no stored token, issuing one");
                self.insert_new(&mut conn, user_key, now).map(Some)
            }
            Some(record) if self.is_expiring(record.time_expired, now) => {
                info!(user_key, "token expiring, issuing a replacement");
                self.replace(&mut conn, user_key, &record, now).map(Some)
            }
            Some(_) => {
                info!(user_key, "token is not expiring");
                Ok(None)
            }
        }
    }

    /// Delete `expiring` and store a fresh token in its place.
    fn replace(
        &self,
        conn: &mut SqliteConnection,
        user_key: &str,
        expiring: &TokenRecord,
        now: NaiveDateTime,
    ) -> AppResult<String> {
        // Zero rows means another request already removed it.
        let deleted = diesel::delete(dsl::tokens.find(&expiring.token))
            .execute(conn)
            .map_err(|e| {
                error!(user_key, error = %e, "unable to remove expiring token");
                AppError::Conflict(format!("token removal failed: {e}"))
            })?;
        if deleted == 0 {
            info!(user_key, "expiring token already removed");
        }
        self.insert_new(conn, user_key, now)
    }

    fn insert_new(
        &self,
        conn: &mut SqliteConnection,
        user_key: &str,
        now: NaiveDateTime,
    ) -> AppResult<String> {
        let lifetime = chrono::Duration::from_std(self.policy.lifetime)
            .map_err(|e| AppError::InternalError(format!("invalid token lifetime: {e}")))?;
        let record = TokenRecord {
            token: generate_token(),
            pro_order_id: user_key.to_string(),
            time_expired: now + lifetime,
        };

        diesel::insert_into(dsl::tokens)
            .values(&record)
            .execute(conn)
            .map_err(|e| {
                error!(user_key, error = %e, "token not stored");
                AppError::from(e)
            })?;

        Ok(record.token)
    }

    /// The user key for a live token, or `None` if it is unknown or expired.
    pub fn resolve(&self, token: &str) -> AppResult<Option<String>> {
        if token.is_empty() {
            return Ok(None);
        }

        let mut conn = self.pool.get()?;
        let record: Option<TokenRecord> = dsl::tokens
            .find(token)
            .select(TokenRecord::as_select())
            .first(&mut conn)
            .optional()?;

        match record {
            Some(record) if record.time_expired > Utc::now().naive_utc() => {
                Ok(Some(record.pro_order_id))
            }
            Some(_) => {
                info!("token is not current");
                Ok(None)
            }
            None => {
                info!("token not found");
                Ok(None)
            }
        }
    }
}

//! Persistent ledger of purchases and their remaining consumable quota.
//!
//! Every operation re-reads the current row; nothing is cached between calls.
//! Single-row writes are conditional on the row's `version` and retried when a
//! concurrent writer got there first. Recording a consumable purchase folds the
//! unused quota of the buyer's earlier purchases into the new row inside one
//! transaction.

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use tracing::{error, info, warn};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::model::{NewPurchaseRecord, PurchaseRecord};
use crate::schema::purchases::dsl;
use crate::types::{products, ScanLookup};

const MAX_TRANSACTION_ATTEMPTS: u32 = 3;
const MAX_UPDATE_ATTEMPTS: u32 = 10;

/// Arguments to [`QuotaLedger::record_purchase`].
#[derive(Debug, Clone, Copy)]
pub struct NewPurchase<'a> {
    pub order_id: &'a str,
    pub product_id: &'a str,
    pub purchase_token: &'a str,
    pub account_id: &'a str,
    pub quantity: i32,
}

#[derive(Clone)]
pub struct QuotaLedger {
    pool: DbPool,
    scans_per_unit: i32,
}

fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

impl QuotaLedger {
    pub fn new(pool: DbPool, scans_per_unit: i32) -> Self {
        Self {
            pool,
            scans_per_unit,
        }
    }

    pub fn purchase(&self, order_id: &str) -> AppResult<Option<PurchaseRecord>> {
        let mut conn = self.pool.get()?;
        Ok(find(&mut conn, order_id)?)
    }

    /// Record a purchase at most once.
    ///
    /// Returns `Ok(false)` when the order id is already known or the purchase
    /// token is already bound to another order. A failed consolidation is
    /// retried as a whole; if it keeps failing the error is surfaced and
    /// nothing is written.
    pub fn record_purchase(&self, purchase: NewPurchase<'_>) -> AppResult<bool> {
        if purchase.order_id.is_empty() || purchase.product_id.is_empty() {
            return Err(AppError::Invalid(
                "order id and product id are required".to_string(),
            ));
        }

        let mut conn = self.pool.get()?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match conn.immediate_transaction(|conn| self.record_in_transaction(conn, &purchase)) {
                Ok(recorded) => return Ok(recorded),
                Err(e) if is_unique_violation(&e) => {
                    // A concurrent caller recorded the same order or token first.
                    info!(
                        order_id = purchase.order_id,
                        "purchase recorded concurrently, not recording again"
                    );
                    return Ok(false);
                }
                Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    warn!(
                        order_id = purchase.order_id,
                        attempt,
                        error = %e,
                        "purchase transaction failed, retrying"
                    );
                }
                Err(e) => {
                    error!(
                        order_id = purchase.order_id,
                        account_id = purchase.account_id,
                        error = %e,
                        "purchase transaction failed, nothing recorded"
                    );
                    return Err(AppError::TransactionFailed(e.to_string()));
                }
            }
        }
    }

    fn record_in_transaction(
        &self,
        conn: &mut SqliteConnection,
        purchase: &NewPurchase<'_>,
    ) -> Result<bool, DieselError> {
        if find(conn, purchase.order_id)?.is_some() {
            info!(order_id = purchase.order_id, "order already recorded");
            return Ok(false);
        }

        if !purchase.purchase_token.is_empty() {
            let bound: i64 = dsl::purchases
                .filter(dsl::purchase_token.eq(purchase.purchase_token))
                .count()
                .get_result(conn)?;
            if bound > 0 {
                warn!(
                    order_id = purchase.order_id,
                    "purchase token already bound to another order"
                );
                return Ok(false);
            }
        }

        let mut scans_left = 0;
        let mut sources: Vec<PurchaseRecord> = Vec::new();
        if products::is_consumable(purchase.product_id) {
            // Purchases without an account id cannot be attributed to a buyer.
            if !purchase.account_id.is_empty() {
                sources = dsl::purchases
                    .filter(dsl::obfuscated_account_id.eq(purchase.account_id))
                    .filter(dsl::scans_left.gt(0))
                    .select(PurchaseRecord::as_select())
                    .load(conn)?;
            }
            let carry_over: i32 = sources.iter().map(|r| r.scans_left).sum();
            let granted = self.scans_per_unit.saturating_mul(purchase.quantity.max(1));
            scans_left = carry_over.saturating_add(granted);
        }

        if !sources.is_empty() {
            let ids: Vec<&str> = sources.iter().map(|r| r.order_id.as_str()).collect();
            let expected = ids.len();
            let zeroed = diesel::update(dsl::purchases.filter(dsl::order_id.eq_any(ids)))
                .filter(dsl::scans_left.gt(0))
                .set((dsl::scans_left.eq(0), dsl::version.eq(dsl::version + 1)))
                .execute(conn)?;
            if zeroed != expected {
                return Err(DieselError::RollbackTransaction);
            }
            info!(
                order_id = purchase.order_id,
                consolidated = expected,
                "folded unused scans from earlier purchases"
            );
        }

        let record = NewPurchaseRecord::new(
            purchase.order_id.to_string(),
            purchase.product_id.to_string(),
            purchase.purchase_token.to_string(),
            purchase.account_id.to_string(),
            scans_left,
        );
        diesel::insert_into(dsl::purchases)
            .values(&record)
            .execute(conn)?;

        info!(
            order_id = purchase.order_id,
            product_id = purchase.product_id,
            scans_left,
            "purchase recorded"
        );
        Ok(true)
    }

    /// Scans left on an order, binding `purchase_token` to legacy rows that have none.
    pub fn get_scans(&self, order_id: &str, purchase_token: &str) -> AppResult<ScanLookup> {
        let mut conn = self.pool.get()?;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(record) = find(&mut conn, order_id)? else {
                info!(order_id, "order not found");
                return Ok(ScanLookup::NotFound);
            };

            if !record.purchase_token.is_empty() {
                if record.purchase_token == purchase_token {
                    return Ok(ScanLookup::Found(record.scans_left));
                }
                warn!(order_id, "purchase token does not match the recorded one");
                return Ok(ScanLookup::TokenConflict);
            }

            if purchase_token.is_empty() {
                return Ok(ScanLookup::Found(record.scans_left));
            }

            let bound_elsewhere: i64 = dsl::purchases
                .filter(dsl::purchase_token.eq(purchase_token))
                .filter(dsl::order_id.ne(order_id))
                .count()
                .get_result(&mut conn)?;
            if bound_elsewhere > 0 {
                warn!(order_id, "purchase token already bound to another order");
                return Ok(ScanLookup::TokenConflict);
            }

            let updated = diesel::update(
                dsl::purchases
                    .filter(dsl::order_id.eq(order_id))
                    .filter(dsl::version.eq(record.version)),
            )
            .set((
                dsl::purchase_token.eq(purchase_token),
                dsl::time_used.eq(Some(chrono::Utc::now().naive_utc())),
                dsl::version.eq(record.version + 1),
            ))
            .execute(&mut conn);

            match updated {
                Ok(1) => {
                    info!(order_id, "bound purchase token to legacy order");
                    return Ok(ScanLookup::Found(record.scans_left));
                }
                Ok(_) => continue,
                Err(e) if is_unique_violation(&e) => return Ok(ScanLookup::TokenConflict),
                Err(e) => return Err(e.into()),
            }
        }

        error!(order_id, "gave up binding purchase token after repeated conflicts");
        Err(AppError::Conflict(format!(
            "order {order_id} kept changing while binding its purchase token"
        )))
    }

    /// Consume one scan. Returns the scans left afterwards, or 0 if none were left.
    pub fn decrement_scans(&self, order_id: &str) -> AppResult<i32> {
        Ok(self.take_scan(order_id)?.unwrap_or(0))
    }

    /// Consume one scan, or `None` if the order had none left to take.
    ///
    /// Unlike [`decrement_scans`](Self::decrement_scans) this tells a caller that
    /// moved the quota from 1 to 0 apart from one that found it already empty.
    pub fn take_scan(&self, order_id: &str) -> AppResult<Option<i32>> {
        let mut conn = self.pool.get()?;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let record = match find(&mut conn, order_id)? {
                Some(record) if record.scans_left > 0 => record,
                _ => return Ok(None),
            };

            let remaining = record.scans_left - 1;
            let updated = diesel::update(
                dsl::purchases
                    .filter(dsl::order_id.eq(order_id))
                    .filter(dsl::version.eq(record.version))
                    .filter(dsl::scans_left.gt(0)),
            )
            .set((
                dsl::scans_left.eq(remaining),
                dsl::time_used.eq(Some(chrono::Utc::now().naive_utc())),
                dsl::version.eq(record.version + 1),
            ))
            .execute(&mut conn)?;

            if updated == 1 {
                info!(order_id, remaining, "scan consumed");
                return Ok(Some(remaining));
            }
            warn!(order_id, attempt, "concurrent update while consuming a scan, retrying");
        }

        error!(order_id, "gave up consuming a scan after repeated conflicts");
        Err(AppError::Conflict(format!(
            "order {order_id} kept changing while consuming a scan"
        )))
    }

    /// Touch `time_used`. Returns false if the order is unknown.
    pub fn update_time_used(&self, order_id: &str) -> AppResult<bool> {
        let mut conn = self.pool.get()?;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(record) = find(&mut conn, order_id)? else {
                return Ok(false);
            };

            let updated = diesel::update(
                dsl::purchases
                    .filter(dsl::order_id.eq(order_id))
                    .filter(dsl::version.eq(record.version)),
            )
            .set((
                dsl::time_used.eq(Some(chrono::Utc::now().naive_utc())),
                dsl::version.eq(record.version + 1),
            ))
            .execute(&mut conn)?;

            if updated == 1 {
                return Ok(true);
            }
        }

        error!(order_id, "gave up updating time used after repeated conflicts");
        Err(AppError::Conflict(format!(
            "order {order_id} kept changing while updating time used"
        )))
    }
}

fn find(conn: &mut SqliteConnection, order_id: &str) -> Result<Option<PurchaseRecord>, DieselError> {
    dsl::purchases
        .find(order_id)
        .select(PurchaseRecord::as_select())
        .first(conn)
        .optional()
}

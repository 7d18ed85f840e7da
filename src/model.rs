use chrono::NaiveDateTime;
use diesel::prelude::*;

/// One row of the purchase ledger, keyed by the billing provider's order id.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::purchases)]
#[diesel(primary_key(order_id))]
pub struct PurchaseRecord {
    pub order_id: String,
    pub product_id: String,
    /// Empty on legacy rows until the first lookup backfills it.
    pub purchase_token: String,
    pub obfuscated_account_id: String,
    pub scans_left: i32,
    pub time_created: NaiveDateTime,
    pub time_used: Option<NaiveDateTime>,
    /// Bumped on every write; conditional updates compare against it.
    pub version: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::purchases)]
pub struct NewPurchaseRecord {
    pub order_id: String,
    pub product_id: String,
    pub purchase_token: String,
    pub obfuscated_account_id: String,
    pub scans_left: i32,
    pub time_created: NaiveDateTime,
}

impl NewPurchaseRecord {
    pub fn new(
        order_id: String,
        product_id: String,
        purchase_token: String,
        obfuscated_account_id: String,
        scans_left: i32,
    ) -> Self {
        Self {
            order_id,
            product_id,
            purchase_token,
            obfuscated_account_id,
            scans_left,
            time_created: chrono::Utc::now().naive_utc(),
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::tokens)]
#[diesel(primary_key(token))]
pub struct TokenRecord {
    pub token: String,
    /// The user key this token authenticates as.
    pub pro_order_id: String,
    pub time_expired: NaiveDateTime,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::items)]
pub struct ItemRecord {
    pub kind: String,
    pub user_key: String,
    pub name: String,
    pub data: String,
    pub data_length: i64,
    pub summary: Option<String>,
}

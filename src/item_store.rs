use diesel::prelude::*;
use tracing::info;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::model::ItemRecord;
use crate::schema::items::dsl;
use crate::types::EnumeratedItem;

pub const MAX_ENUMERATED_ITEMS: i64 = 1000;

/// How one kind of per-user item is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    pub table_name: &'static str,
    /// Items carry a short summary that enumeration returns with them.
    pub use_summary_field: bool,
    /// Items may have an image stored alongside them.
    pub check_image: bool,
}

impl StorageConfig {
    pub const MEAL: Self = Self {
        table_name: "Meal",
        use_summary_field: true,
        check_image: true,
    };
    pub const PERSON_LIST: Self = Self {
        table_name: "PersonList",
        use_summary_field: false,
        check_image: false,
    };
    pub const VENUE_LIST: Self = Self {
        table_name: "VenueList",
        use_summary_field: false,
        check_image: false,
    };
}

/// Item names are 14 digit `yyyymmddhhmmss` stamps with a year no later than 3999.
pub fn is_valid_name(name: &str) -> bool {
    name.len() == 14 && name.bytes().all(|b| b.is_ascii_digit()) && name.as_bytes()[0] <= b'3'
}

#[derive(Clone)]
pub struct ItemStore {
    pool: DbPool,
    config: StorageConfig,
}

impl ItemStore {
    pub fn new(pool: DbPool, config: StorageConfig) -> Self {
        Self { pool, config }
    }

    fn check_name(name: &str) -> AppResult<()> {
        if is_valid_name(name) {
            Ok(())
        } else {
            Err(AppError::Invalid(format!("invalid item name {name:?}")))
        }
    }

    pub fn put(
        &self,
        user_key: &str,
        name: &str,
        data: String,
        summary: Option<String>,
    ) -> AppResult<()> {
        Self::check_name(name)?;
        let summary = match (self.config.use_summary_field, summary) {
            (true, Some(summary)) => Some(summary),
            (true, None) => return Err(AppError::Invalid("summary is required".to_string())),
            (false, _) => None,
        };

        let mut conn = self.pool.get()?;
        let record = ItemRecord {
            kind: self.config.table_name.to_string(),
            user_key: user_key.to_string(),
            name: name.to_string(),
            data_length: data.len() as i64,
            data,
            summary,
        };
        diesel::replace_into(dsl::items)
            .values(&record)
            .execute(&mut conn)?;

        info!(
            table = self.config.table_name,
            user_key,
            name,
            length = record.data_length,
            "item stored"
        );
        Ok(())
    }

    pub fn get(&self, user_key: &str, name: &str) -> AppResult<Option<String>> {
        Self::check_name(name)?;
        let mut conn = self.pool.get()?;
        Ok(dsl::items
            .find((self.config.table_name, user_key, name))
            .select(dsl::data)
            .first(&mut conn)
            .optional()?)
    }

    /// Returns false if there was nothing to delete.
    pub fn delete(&self, user_key: &str, name: &str) -> AppResult<bool> {
        Self::check_name(name)?;
        let mut conn = self.pool.get()?;
        let deleted = diesel::delete(dsl::items.find((self.config.table_name, user_key, name)))
            .execute(&mut conn)?;
        Ok(deleted > 0)
    }

    /// Up to `top` items, newest first, optionally only those older than `before`.
    pub fn enumerate(
        &self,
        user_key: &str,
        before: Option<&str>,
        top: i64,
    ) -> AppResult<Vec<EnumeratedItem>> {
        if !(1..=MAX_ENUMERATED_ITEMS).contains(&top) {
            return Err(AppError::Invalid(format!(
                "top must be between 1 and {MAX_ENUMERATED_ITEMS}"
            )));
        }
        if let Some(before) = before {
            Self::check_name(before)?;
        }

        let mut conn = self.pool.get()?;
        let mut query = dsl::items
            .filter(dsl::kind.eq(self.config.table_name))
            .filter(dsl::user_key.eq(user_key))
            .select(ItemRecord::as_select())
            .into_boxed();
        if let Some(before) = before {
            query = query.filter(dsl::name.lt(before));
        }
        let records: Vec<ItemRecord> = query
            .order(dsl::name.desc())
            .limit(top)
            .load(&mut conn)?;

        let use_summary = self.config.use_summary_field;
        Ok(records
            .into_iter()
            .map(|record| EnumeratedItem {
                name: record.name,
                data_length: record.data_length,
                data: record.data,
                summary: if use_summary { record.summary } else { None },
                // Image blobs live outside this service.
                has_remote_image: false,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::TestDb;

    #[test]
    fn names_must_be_timestamps() {
        assert!(is_valid_name("20240131235959"));
        assert!(!is_valid_name("2024013123595"));
        assert!(!is_valid_name("40240131235959"));
        assert!(!is_valid_name("2024013123595a"));
    }

    #[test]
    fn put_get_delete() {
        let db = TestDb::new();
        let store = ItemStore::new(db.pool.clone(), StorageConfig::PERSON_LIST);

        store.put("u", "20240101000000", "alice,bob".into(), None).unwrap();
        assert_eq!(
            store.get("u", "20240101000000").unwrap().as_deref(),
            Some("alice,bob")
        );
        assert_eq!(store.get("other", "20240101000000").unwrap(), None);

        store.put("u", "20240101000000", "carol".into(), None).unwrap();
        assert_eq!(store.get("u", "20240101000000").unwrap().as_deref(), Some("carol"));

        assert!(store.delete("u", "20240101000000").unwrap());
        assert!(!store.delete("u", "20240101000000").unwrap());
    }

    #[test]
    fn meals_need_a_summary() {
        let db = TestDb::new();
        let store = ItemStore::new(db.pool.clone(), StorageConfig::MEAL);

        let result = store.put("u", "20240101000000", "{}".into(), None);
        assert!(matches!(result, Err(AppError::Invalid(_))));
        store
            .put("u", "20240101000000", "{}".into(), Some("Lunch".into()))
            .unwrap();

        let items = store.enumerate("u", None, 10).unwrap();
        assert_eq!(items[0].summary.as_deref(), Some("Lunch"));
    }

    #[test]
    fn kinds_do_not_mix() {
        let db = TestDb::new();
        let people = ItemStore::new(db.pool.clone(), StorageConfig::PERSON_LIST);
        let venues = ItemStore::new(db.pool.clone(), StorageConfig::VENUE_LIST);

        people.put("u", "20240101000000", "people".into(), None).unwrap();
        assert_eq!(venues.get("u", "20240101000000").unwrap(), None);
    }

    #[test]
    fn enumerate_is_newest_first_and_pages_with_before() {
        let db = TestDb::new();
        let store = ItemStore::new(db.pool.clone(), StorageConfig::VENUE_LIST);
        for name in ["20240101000000", "20240301000000", "20240201000000"] {
            store.put("u", name, name.to_string(), None).unwrap();
        }

        let names: Vec<String> = store
            .enumerate("u", None, 2)
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, ["20240301000000", "20240201000000"]);

        let older: Vec<String> = store
            .enumerate("u", Some("20240201000000"), 10)
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(older, ["20240101000000"]);
    }

    #[test]
    fn enumerate_bounds_top() {
        let db = TestDb::new();
        let store = ItemStore::new(db.pool.clone(), StorageConfig::VENUE_LIST);
        assert!(store.enumerate("u", None, 0).is_err());
        assert!(store.enumerate("u", None, MAX_ENUMERATED_ITEMS + 1).is_err());
    }
}

//! Persistence for user records.
//!
//! Every query-shaped operation takes a [`UserQuery`] by value and runs
//! [`normalize_lookup`] on it before anything reaches the database, so lookups
//! by address are case-insensitive no matter which alias the caller used.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr,
    TransactionTrait,
};
use tracing::{debug, info};

use crate::entities::{user, user_giveaway};
use crate::models::user::{UserRecord, UserUpdate};
use crate::query::{FilterError, UserQuery, normalize_lookup, to_condition};
use crate::user::sanitize_address;

/// Upper bound on rows returned by a single `find_many`.
pub const MAX_FIND_LIMIT: u64 = 500;

const MAX_GIVEAWAYS_PER_USER: u64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user {0} already exists")]
    DuplicateIdentity(String),
    #[error("invalid user record: {0}")]
    InvalidRecord(String),
    #[error("user {0} has reached the giveaway participation limit")]
    GiveawayLimit(String),
    #[error(transparent)]
    UnsupportedFilter(#[from] FilterError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

#[derive(Clone)]
pub struct UserStore {
    database: DatabaseConnection,
}

impl UserStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.database
    }

    /// Inserts a new record. A record whose address matches an existing one
    /// after lowercasing is rejected with [`StoreError::DuplicateIdentity`]; a
    /// blank one with [`StoreError::InvalidRecord`].
    pub async fn create(&self, record: UserRecord) -> Result<UserRecord, StoreError> {
        let address = sanitize_address(&record.address)
            .map_err(|err| StoreError::InvalidRecord(err.to_string()))?;
        let existing = user::Entity::find_by_id(address.clone())
            .one(&self.database)
            .await?;
        if existing.is_some() {
            return Err(StoreError::DuplicateIdentity(address));
        }

        let txn = self.database.begin().await?;
        let active = user::ActiveModel {
            address: Set(address.clone()),
            email: Set(record.email.clone()),
            is_gallery_enabled: Set(record.is_gallery_enabled),
            faucet_last_requested_at: Set(record
                .faucet_last_requested_at
                .map(|at| at.fixed_offset())),
            created_at: NotSet,
            updated_at: NotSet,
        };
        let model = active
            .insert(&txn)
            .await
            .map_err(|err| map_insert_error(err, &address))?;

        for giveaway_id in &record.giveaways_participated_in {
            append_giveaway(&txn, &address, giveaway_id).await?;
        }
        let giveaways = load_giveaways(&txn, &address).await?;
        txn.commit().await?;

        info!("Created user {address}");
        Ok(UserRecord::from_model(model, giveaways))
    }

    /// Returns the record for `address`, creating it with defaults on first
    /// sight.
    pub async fn find_or_create(&self, address: &str) -> Result<UserRecord, StoreError> {
        if let Some(found) = self.find_one(UserQuery::by_address(address)).await? {
            return Ok(found);
        }
        match self.create(UserRecord::new(address)).await {
            Err(StoreError::DuplicateIdentity(canonical)) => self
                .find_one(UserQuery::by_address(&canonical))
                .await?
                .ok_or(StoreError::DuplicateIdentity(canonical)),
            other => other,
        }
    }

    pub async fn find_one(&self, query: UserQuery) -> Result<Option<UserRecord>, StoreError> {
        let condition = prepare("find_one", query)?;
        find_first(&self.database, condition).await
    }

    pub async fn find_many(
        &self,
        query: UserQuery,
        limit: Option<u64>,
    ) -> Result<Vec<UserRecord>, StoreError> {
        let condition = prepare("find_many", query)?;
        let limit = limit.unwrap_or(MAX_FIND_LIMIT).min(MAX_FIND_LIMIT);
        let models = user::Entity::find()
            .filter(condition)
            .order_by_asc(user::Column::CreatedAt)
            .order_by_asc(user::Column::Address)
            .limit(limit)
            .all(&self.database)
            .await?;
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let addresses: Vec<String> = models.iter().map(|model| model.address.clone()).collect();
        let mut grouped: HashMap<String, Vec<user_giveaway::Model>> = HashMap::new();
        let rows = user_giveaway::Entity::find()
            .filter(user_giveaway::Column::UserAddress.is_in(addresses))
            .all(&self.database)
            .await?;
        for row in rows {
            grouped.entry(row.user_address.clone()).or_default().push(row);
        }

        Ok(models
            .into_iter()
            .map(|model| {
                let giveaways = grouped.remove(&model.address).unwrap_or_default();
                UserRecord::from_model(model, giveaways)
            })
            .collect())
    }

    pub async fn count(&self, query: UserQuery) -> Result<u64, StoreError> {
        let condition = prepare("count", query)?;
        let total = user::Entity::find()
            .filter(condition)
            .count(&self.database)
            .await?;
        Ok(total)
    }

    /// Applies `update` to the first match. Returns the number of records
    /// matched, zero or one.
    pub async fn update_one(&self, query: UserQuery, update: &UserUpdate) -> Result<u64, StoreError> {
        let updated = self.find_one_and_update(query, update).await?;
        Ok(u64::from(updated.is_some()))
    }

    /// Applies `update` to every match and returns how many matched.
    pub async fn update_many(
        &self,
        query: UserQuery,
        update: &UserUpdate,
    ) -> Result<u64, StoreError> {
        let condition = prepare("update_many", query)?;
        let txn = self.database.begin().await?;
        let addresses: Vec<String> = user::Entity::find()
            .select_only()
            .column(user::Column::Address)
            .filter(condition)
            .into_tuple()
            .all(&txn)
            .await?;
        if addresses.is_empty() {
            txn.rollback().await?;
            return Ok(0);
        }

        // Bulk updates bypass `before_save`, so stamp `updated_at` here.
        let mut changes = user::ActiveModel {
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        update.apply_to(&mut changes);
        user::Entity::update_many()
            .set(changes)
            .filter(user::Column::Address.is_in(addresses.clone()))
            .exec(&txn)
            .await?;

        if let Some(giveaway_id) = &update.push_giveaway {
            for address in &addresses {
                append_giveaway(&txn, address, giveaway_id).await?;
            }
        }
        txn.commit().await?;

        debug!("update_many touched {} users", addresses.len());
        Ok(addresses.len() as u64)
    }

    /// Applies `update` to the first match and returns the record as stored
    /// afterwards.
    pub async fn find_one_and_update(
        &self,
        query: UserQuery,
        update: &UserUpdate,
    ) -> Result<Option<UserRecord>, StoreError> {
        let condition = prepare("find_one_and_update", query)?;
        let txn = self.database.begin().await?;
        let Some(model) = first_model(&txn, condition).await? else {
            txn.rollback().await?;
            return Ok(None);
        };

        let address = model.address.clone();
        let mut active = model.into_active_model();
        update.apply_to(&mut active);
        let model = active.update(&txn).await?;

        if let Some(giveaway_id) = &update.push_giveaway {
            append_giveaway(&txn, &address, giveaway_id).await?;
        }
        let giveaways = load_giveaways(&txn, &address).await?;
        txn.commit().await?;

        Ok(Some(UserRecord::from_model(model, giveaways)))
    }

    /// Deletes the first match along with its giveaway rows and returns what
    /// was removed.
    pub async fn find_one_and_remove(
        &self,
        query: UserQuery,
    ) -> Result<Option<UserRecord>, StoreError> {
        let condition = prepare("find_one_and_remove", query)?;
        let txn = self.database.begin().await?;
        let Some(model) = first_model(&txn, condition).await? else {
            txn.rollback().await?;
            return Ok(None);
        };

        let address = model.address.clone();
        let giveaways = load_giveaways(&txn, &address).await?;
        user_giveaway::Entity::delete_many()
            .filter(user_giveaway::Column::UserAddress.eq(address.as_str()))
            .exec(&txn)
            .await?;
        user::Entity::delete_by_id(address.clone())
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!("Removed user {address}");
        Ok(Some(UserRecord::from_model(model, giveaways)))
    }
}

fn prepare(operation: &str, mut query: UserQuery) -> Result<Condition, StoreError> {
    normalize_lookup(&mut query);
    debug!(operation, filter = ?query, "executing user query");
    Ok(to_condition(&query)?)
}

async fn first_model<C>(db: &C, condition: Condition) -> Result<Option<user::Model>, DbErr>
where
    C: ConnectionTrait,
{
    user::Entity::find()
        .filter(condition)
        .order_by_asc(user::Column::CreatedAt)
        .order_by_asc(user::Column::Address)
        .one(db)
        .await
}

async fn find_first<C>(db: &C, condition: Condition) -> Result<Option<UserRecord>, StoreError>
where
    C: ConnectionTrait,
{
    let Some(model) = first_model(db, condition).await? else {
        return Ok(None);
    };
    let giveaways = load_giveaways(db, &model.address).await?;
    Ok(Some(UserRecord::from_model(model, giveaways)))
}

async fn load_giveaways<C>(db: &C, address: &str) -> Result<Vec<user_giveaway::Model>, DbErr>
where
    C: ConnectionTrait,
{
    user_giveaway::Entity::find()
        .filter(user_giveaway::Column::UserAddress.eq(address))
        .order_by_asc(user_giveaway::Column::Position)
        .all(db)
        .await
}

async fn append_giveaway<C>(db: &C, address: &str, giveaway_id: &str) -> Result<(), StoreError>
where
    C: ConnectionTrait,
{
    let position = user_giveaway::Entity::find()
        .filter(user_giveaway::Column::UserAddress.eq(address))
        .count(db)
        .await?;
    ensure_giveaway_capacity(address, position)?;

    let row = user_giveaway::ActiveModel {
        user_address: Set(address.to_string()),
        position: Set(position as i32),
        giveaway_id: Set(giveaway_id.to_string()),
    };
    user_giveaway::Entity::insert(row)
        .exec_without_returning(db)
        .await?;
    Ok(())
}

fn ensure_giveaway_capacity(address: &str, position: u64) -> Result<(), StoreError> {
    if position >= MAX_GIVEAWAYS_PER_USER {
        return Err(StoreError::GiveawayLimit(address.to_string()));
    }
    Ok(())
}

fn map_insert_error(err: DbErr, address: &str) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            StoreError::DuplicateIdentity(address.to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Duration;
    use migration::MigratorTrait;
    use sea_orm::{ConnectOptions, Database};
    use serde_json::json;

    use super::*;

    pub(crate) const MIXED: &str = "0xAbCdEf0123456789abcdef0123456789ABCDEF01";
    pub(crate) const LOWER: &str = "0xabcdef0123456789abcdef0123456789abcdef01";
    const OTHER: &str = "0x1111111111111111111111111111111111111111";
    const GIVEAWAY_A: &str = "5a1b2c3d4e5f60718293a4b5";
    const GIVEAWAY_B: &str = "6b2c3d4e5f60718293a4b5c6";

    pub(crate) async fn memory_store() -> UserStore {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let database = Database::connect(options).await.expect("sqlite connects");
        migration::Migrator::up(&database, None)
            .await
            .expect("migrations apply");
        UserStore::new(database)
    }

    fn gallery_enabled() -> UserUpdate {
        UserUpdate {
            is_gallery_enabled: Some(true),
            ..UserUpdate::default()
        }
    }

    fn query(value: serde_json::Value) -> UserQuery {
        serde_json::from_value(value).expect("filter object")
    }

    #[tokio::test]
    async fn create_stores_lowercase_address_with_defaults() {
        let store = memory_store().await;
        let created = store.create(UserRecord::new(MIXED)).await.unwrap();
        assert_eq!(created.address, LOWER);
        assert_eq!(created.email, None);
        assert!(!created.is_gallery_enabled);
        assert_eq!(created.faucet_last_requested_at, None);
        assert!(created.giveaways_participated_in.is_empty());
        assert_eq!(created.created_at, created.updated_at);
    }

    #[tokio::test]
    async fn addresses_differing_only_in_case_are_duplicates() {
        let store = memory_store().await;
        store.create(UserRecord::new(MIXED)).await.unwrap();
        let err = store.create(UserRecord::new(LOWER)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(ref address) if address == LOWER));
        assert_eq!(store.count(UserQuery::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blank_addresses_are_rejected() {
        let store = memory_store().await;
        for blank in ["", "   ", "\t\n"] {
            let err = store.create(UserRecord::new(blank)).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidRecord(_)), "{blank:?}: {err}");
        }
        assert!(matches!(
            store.find_or_create("  ").await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(store.count(UserQuery::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_trims_surrounding_whitespace() {
        let store = memory_store().await;
        let created = store
            .create(UserRecord::new(&format!("  {MIXED} ")))
            .await
            .unwrap();
        assert_eq!(created.address, LOWER);
    }

    #[tokio::test]
    async fn racing_insert_maps_to_duplicate_identity() {
        let store = memory_store().await;
        let row = || user::ActiveModel {
            address: Set(LOWER.to_string()),
            ..Default::default()
        };
        row().insert(store.connection()).await.unwrap();

        let err = row().insert(store.connection()).await.unwrap_err();
        let mapped = map_insert_error(err, LOWER);
        assert!(matches!(mapped, StoreError::DuplicateIdentity(ref address) if address == LOWER));
    }

    #[test]
    fn giveaway_list_is_bounded() {
        assert!(ensure_giveaway_capacity(LOWER, MAX_GIVEAWAYS_PER_USER - 1).is_ok());
        assert!(matches!(
            ensure_giveaway_capacity(LOWER, MAX_GIVEAWAYS_PER_USER),
            Err(StoreError::GiveawayLimit(ref address)) if address == LOWER
        ));
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let store = memory_store().await;
        let first = store.find_or_create(MIXED).await.unwrap();
        let second = store.find_or_create(LOWER).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count(UserQuery::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lookups_are_case_insensitive_for_every_alias() {
        let store = memory_store().await;
        store.create(UserRecord::new(LOWER)).await.unwrap();
        for alias in ["address", "id", "_id"] {
            let found = store
                .find_one(UserQuery::new().with(alias, MIXED))
                .await
                .unwrap();
            assert_eq!(found.map(|user| user.address).as_deref(), Some(LOWER));
            assert_eq!(store.count(UserQuery::new().with(alias, MIXED)).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn operator_filters_are_not_lowercased() {
        let store = memory_store().await;
        store.create(UserRecord::new(LOWER)).await.unwrap();
        let exact = store
            .find_many(query(json!({"address": {"$in": [MIXED]}})), None)
            .await
            .unwrap();
        assert!(exact.is_empty());
        let lowered = store
            .find_many(query(json!({"address": {"$in": [LOWER]}})), None)
            .await
            .unwrap();
        assert_eq!(lowered.len(), 1);
    }

    #[tokio::test]
    async fn find_one_and_update_applies_changes_and_giveaways() {
        let store = memory_store().await;
        let created = store.create(UserRecord::new(LOWER)).await.unwrap();
        let requested_at = Utc::now() - Duration::minutes(5);

        let mut update = UserUpdate::faucet_requested_at(requested_at);
        update.email = Some(Some("artist@codex.xyz".into()));
        update.is_gallery_enabled = Some(true);
        update.push_giveaway = Some(GIVEAWAY_A.into());
        let updated = store
            .find_one_and_update(UserQuery::by_address(MIXED), &update)
            .await
            .unwrap()
            .expect("user matched");
        store
            .update_one(UserQuery::by_address(MIXED), &UserUpdate::push_giveaway(GIVEAWAY_B))
            .await
            .unwrap();

        assert_eq!(updated.email.as_deref(), Some("artist@codex.xyz"));
        assert!(updated.is_gallery_enabled);
        assert_eq!(
            updated.faucet_last_requested_at.map(|at| at.timestamp_millis()),
            Some(requested_at.timestamp_millis())
        );
        assert!(updated.updated_at >= created.updated_at);

        let reloaded = store
            .find_one(UserQuery::by_address(LOWER))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.giveaways_participated_in, vec![GIVEAWAY_A, GIVEAWAY_B]);
    }

    #[tokio::test]
    async fn update_without_match_reports_zero() {
        let store = memory_store().await;
        let matched = store
            .update_one(UserQuery::by_address(OTHER), &gallery_enabled())
            .await
            .unwrap();
        assert_eq!(matched, 0);
        let updated = store
            .find_one_and_update(UserQuery::by_address(OTHER), &gallery_enabled())
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn update_many_touches_every_match() {
        let store = memory_store().await;
        let before = store.create(UserRecord::new(LOWER)).await.unwrap();
        store.create(UserRecord::new(OTHER)).await.unwrap();

        let matched = store
            .update_many(UserQuery::new(), &gallery_enabled())
            .await
            .unwrap();
        assert_eq!(matched, 2);

        let enabled = store
            .count(query(json!({"isGalleryEnabled": true})))
            .await
            .unwrap();
        assert_eq!(enabled, 2);
        let after = store
            .find_one(UserQuery::by_address(LOWER))
            .await
            .unwrap()
            .unwrap();
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn find_one_and_remove_returns_removed_record() {
        let store = memory_store().await;
        let mut record = UserRecord::new(MIXED);
        record.giveaways_participated_in = vec![GIVEAWAY_A.into()];
        store.create(record).await.unwrap();

        let removed = store
            .find_one_and_remove(UserQuery::new().with("id", MIXED))
            .await
            .unwrap()
            .expect("user removed");
        assert_eq!(removed.address, LOWER);
        assert_eq!(removed.giveaways_participated_in, vec![GIVEAWAY_A]);
        assert_eq!(store.count(UserQuery::new()).await.unwrap(), 0);

        let leftover = user_giveaway::Entity::find()
            .count(store.connection())
            .await
            .unwrap();
        assert_eq!(leftover, 0);
        assert!(
            store
                .find_one_and_remove(UserQuery::by_address(LOWER))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_many_filters_on_nullable_columns() {
        let store = memory_store().await;
        store
            .create(UserRecord::new(LOWER).with_email(Some("a@codex.xyz".into())))
            .await
            .unwrap();
        store.create(UserRecord::new(OTHER)).await.unwrap();

        let without_email = store
            .find_many(query(json!({"email": null})), None)
            .await
            .unwrap();
        assert_eq!(without_email.len(), 1);
        assert_eq!(without_email[0].address, OTHER);

        let limited = store.find_many(UserQuery::new(), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_filters_surface_as_errors() {
        let store = memory_store().await;
        let err = store
            .find_one(query(json!({"nickname": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFilter(_)));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::FaucetConfig;
use crate::entities::{user, user_giveaway};
use crate::user::{can_request_faucet_tokens, canonical_address};

/// Stored state of one user, giveaway participations included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub address: String,
    pub email: Option<String>,
    pub is_gallery_enabled: bool,
    pub faucet_last_requested_at: Option<DateTime<Utc>>,
    pub giveaways_participated_in: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// A fresh record with every default applied.
    pub fn new(address: &str) -> Self {
        let now = Utc::now();
        Self {
            address: canonical_address(address),
            email: None,
            is_gallery_enabled: false,
            faucet_last_requested_at: None,
            giveaways_participated_in: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn from_model(model: user::Model, giveaways: Vec<user_giveaway::Model>) -> Self {
        let mut giveaways = giveaways;
        giveaways.sort_by_key(|row| row.position);
        Self {
            address: model.address,
            email: model.email,
            is_gallery_enabled: model.is_gallery_enabled,
            faucet_last_requested_at: model
                .faucet_last_requested_at
                .map(|at| at.with_timezone(&Utc)),
            giveaways_participated_in: giveaways.into_iter().map(|row| row.giveaway_id).collect(),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }

    /// Attaches the derived eligibility flag as of `now`.
    pub fn populate(self, faucet: &FaucetConfig, now: DateTime<Utc>) -> UserDocument {
        let can_request_faucet_tokens =
            can_request_faucet_tokens(self.faucet_last_requested_at, faucet, now);
        UserDocument {
            record: self,
            can_request_faucet_tokens,
        }
    }
}

/// A record together with its derived attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDocument {
    pub record: UserRecord,
    pub can_request_faucet_tokens: bool,
}

impl UserDocument {
    /// Shape sent across the HTTP boundary. Drops the identity-key duplicates
    /// and the giveaway list.
    pub fn to_external(&self) -> ExternalUser {
        let record = &self.record;
        ExternalUser {
            address: record.address.clone(),
            email: record.email.clone(),
            is_gallery_enabled: record.is_gallery_enabled,
            faucet_last_requested_at: record.faucet_last_requested_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            can_request_faucet_tokens: self.can_request_faucet_tokens,
        }
    }

    /// Shape for in-process consumers; keeps everything.
    pub fn to_internal_view(&self) -> InternalUser {
        let record = &self.record;
        InternalUser {
            object_id: record.address.clone(),
            id: record.address.clone(),
            address: record.address.clone(),
            email: record.email.clone(),
            is_gallery_enabled: record.is_gallery_enabled,
            faucet_last_requested_at: record.faucet_last_requested_at,
            giveaways_participated_in: record.giveaways_participated_in.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            can_request_faucet_tokens: self.can_request_faucet_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalUser {
    pub address: String,
    pub email: Option<String>,
    pub is_gallery_enabled: bool,
    pub faucet_last_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub can_request_faucet_tokens: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalUser {
    #[serde(rename = "_id")]
    pub object_id: String,
    pub id: String,
    pub address: String,
    pub email: Option<String>,
    pub is_gallery_enabled: bool,
    pub faucet_last_requested_at: Option<DateTime<Utc>>,
    pub giveaways_participated_in: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub can_request_faucet_tokens: bool,
}

/// Partial update. `None` leaves a field alone; `Some(None)` clears a
/// nullable one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub email: Option<Option<String>>,
    #[serde(default)]
    pub is_gallery_enabled: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub faucet_last_requested_at: Option<Option<DateTime<Utc>>>,
    /// Appended to the end of the giveaway list
    #[serde(default)]
    pub push_giveaway: Option<String>,
}

impl UserUpdate {
    pub fn faucet_requested_at(at: DateTime<Utc>) -> Self {
        Self {
            faucet_last_requested_at: Some(Some(at)),
            ..Self::default()
        }
    }

    pub fn push_giveaway(giveaway_id: impl Into<String>) -> Self {
        Self {
            push_giveaway: Some(giveaway_id.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.is_gallery_enabled.is_none()
            && self.faucet_last_requested_at.is_none()
            && self.push_giveaway.is_none()
    }

    /// Copies the column changes onto an active model. The giveaway push is
    /// applied separately by the store.
    pub fn apply_to(&self, active: &mut user::ActiveModel) {
        use sea_orm::ActiveValue::Set;

        if let Some(email) = &self.email {
            active.email = Set(email.clone());
        }
        if let Some(enabled) = self.is_gallery_enabled {
            active.is_gallery_enabled = Set(enabled);
        }
        if let Some(at) = self.faucet_last_requested_at {
            active.faucet_last_requested_at = Set(at.map(|at| at.fixed_offset()));
        }
    }
}

pub(crate) fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

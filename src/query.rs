//! Lookup filters for user records.
//!
//! A filter is a JSON object mapping field names to conditions, e.g.
//! `{"address": "0xAbC..."}`, `{"id": {"$in": ["0x1", "0x2"]}}` or
//! `{"email": null}`. The identity key may be named `address`, `id` or `_id`;
//! all three refer to the same column. [`normalize_lookup`] must run on every
//! filter before it is executed, see [`crate::store::UserStore`].

use chrono::DateTime;
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{ColumnTrait, Condition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::user;
use crate::user::canonical_address;

/// Accepted names for the identity key.
pub const IDENTITY_ALIASES: [&str; 3] = ["id", "_id", "address"];

const OP_IN: &str = "$in";
const OP_NE: &str = "$ne";
const OP_LIKE: &str = "$like";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter field `{0}`")]
    UnknownField(String),
    #[error("operator `{operator}` is not supported on `{field}`")]
    UnsupportedOperator { field: String, operator: String },
    #[error("filter on `{field}` expects {expected}")]
    InvalidValue {
        field: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserQuery(Map<String, Value>);

impl UserQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_address(address: &str) -> Self {
        Self::new().with("address", address)
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }
}

/// Lowercases every identity-key value that is a plain string. Operator
/// objects, lists, numbers and nulls are left exactly as they are.
pub fn normalize_lookup(query: &mut UserQuery) {
    for alias in IDENTITY_ALIASES {
        if let Some(Value::String(value)) = query.0.get_mut(alias) {
            *value = canonical_address(value);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text,
    Flag,
    Timestamp,
}

impl FieldKind {
    fn expected(self) -> &'static str {
        match self {
            FieldKind::Text => "a string",
            FieldKind::Flag => "a boolean",
            FieldKind::Timestamp => "an RFC 3339 timestamp",
        }
    }
}

fn resolve_field(field: &str) -> Result<(user::Column, FieldKind), FilterError> {
    if IDENTITY_ALIASES.contains(&field) {
        return Ok((user::Column::Address, FieldKind::Text));
    }
    match field {
        "email" => Ok((user::Column::Email, FieldKind::Text)),
        "isGalleryEnabled" => Ok((user::Column::IsGalleryEnabled, FieldKind::Flag)),
        "faucetLastRequestedAt" => Ok((user::Column::FaucetLastRequestedAt, FieldKind::Timestamp)),
        other => Err(FilterError::UnknownField(other.to_string())),
    }
}

/// Translates a filter into a SQL condition on the `users` table.
pub fn to_condition(query: &UserQuery) -> Result<Condition, FilterError> {
    let mut condition = Condition::all();
    for (field, value) in &query.0 {
        let (column, kind) = resolve_field(field)?;
        match value {
            Value::Object(operators) => {
                for (operator, operand) in operators {
                    condition =
                        condition.add(operator_expr(field, column, kind, operator, operand)?);
                }
            }
            Value::Null => condition = condition.add(column.is_null()),
            scalar => condition = condition.add(column.eq(to_sql_value(field, kind, scalar)?)),
        }
    }
    Ok(condition)
}

fn operator_expr(
    field: &str,
    column: user::Column,
    kind: FieldKind,
    operator: &str,
    operand: &Value,
) -> Result<SimpleExpr, FilterError> {
    match (operator, operand) {
        (OP_NE, Value::Null) => Ok(column.is_not_null()),
        (OP_NE, value) => Ok(column.ne(to_sql_value(field, kind, value)?)),
        (OP_IN, Value::Array(items)) => {
            let values = items
                .iter()
                .map(|item| to_sql_value(field, kind, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(column.is_in(values))
        }
        (OP_IN, _) => Err(FilterError::InvalidValue {
            field: field.to_string(),
            expected: "an array",
        }),
        (OP_LIKE, Value::String(pattern)) if matches!(kind, FieldKind::Text) => {
            Ok(column.like(pattern.as_str()))
        }
        (OP_LIKE, Value::String(_)) => Err(FilterError::UnsupportedOperator {
            field: field.to_string(),
            operator: operator.to_string(),
        }),
        (OP_LIKE, _) => Err(FilterError::InvalidValue {
            field: field.to_string(),
            expected: "a string pattern",
        }),
        (other, _) => Err(FilterError::UnsupportedOperator {
            field: field.to_string(),
            operator: other.to_string(),
        }),
    }
}

fn to_sql_value(field: &str, kind: FieldKind, value: &Value) -> Result<sea_orm::Value, FilterError> {
    let invalid = || FilterError::InvalidValue {
        field: field.to_string(),
        expected: kind.expected(),
    };
    match (kind, value) {
        (FieldKind::Text, Value::String(text)) => Ok(text.clone().into()),
        (FieldKind::Flag, Value::Bool(flag)) => Ok((*flag).into()),
        (FieldKind::Timestamp, Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(Into::into)
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{DbBackend, EntityTrait, QueryFilter, QueryTrait};
    use serde_json::json;

    use super::*;

    fn query(value: Value) -> UserQuery {
        serde_json::from_value(value).expect("filter object")
    }

    fn normalized(mut query: UserQuery) -> UserQuery {
        normalize_lookup(&mut query);
        query
    }

    fn sql(query: &UserQuery) -> String {
        let condition = to_condition(query).expect("condition");
        user::Entity::find()
            .filter(condition)
            .build(DbBackend::Postgres)
            .to_string()
    }

    #[test]
    fn lowercases_every_identity_alias() {
        let result = normalized(query(json!({
            "id": "0xABC",
            "_id": "0xDeF",
            "address": "0xFFF",
            "email": "Artist@Codex.xyz",
        })));
        assert_eq!(result.0.get("id"), Some(&json!("0xabc")));
        assert_eq!(result.0.get("_id"), Some(&json!("0xdef")));
        assert_eq!(result.0.get("address"), Some(&json!("0xfff")));
        assert_eq!(result.0.get("email"), Some(&json!("Artist@Codex.xyz")));
    }

    #[test]
    fn case_variants_normalize_to_the_same_query() {
        for raw in ["0xAbCdEf", "0XABCDEF", "0xabcdef", "ÄRGER"] {
            for alias in IDENTITY_ALIASES {
                let mixed = normalized(UserQuery::new().with(alias, raw));
                let lowered = normalized(UserQuery::new().with(alias, raw.to_lowercase()));
                assert_eq!(mixed, lowered);
            }
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalized(query(json!({
            "address": "0xABC",
            "id": {"$in": ["0xDEF"]},
            "isGalleryEnabled": true,
        })));
        let twice = normalized(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn non_string_identity_values_pass_through() {
        let original = query(json!({
            "address": {"$like": "0xAB%"},
            "id": ["0xABC"],
            "_id": 42,
        }));
        assert_eq!(normalized(original.clone()), original);

        let with_null = UserQuery::new().with("address", Value::Null);
        assert_eq!(normalized(with_null.clone()), with_null);
        assert_eq!(normalized(UserQuery::new()), UserQuery::new());
    }

    #[test]
    fn equality_filter_targets_address_column() {
        let statement = sql(&normalized(UserQuery::new().with("_id", "0xABC")));
        assert!(statement.contains(r#""users"."address" = '0xabc'"#), "{statement}");
    }

    #[test]
    fn null_and_pattern_filters_translate() {
        let statement = sql(&query(json!({
            "faucetLastRequestedAt": null,
            "address": {"$like": "0xab%"},
        })));
        assert!(statement.contains(r#""users"."faucet_last_requested_at" IS NULL"#));
        assert!(statement.contains(r#""users"."address" LIKE '0xab%'"#));
    }

    #[test]
    fn rejects_unknown_fields_and_ill_typed_values() {
        assert_eq!(
            to_condition(&query(json!({"giveawaysParticipatedIn": "x"}))).unwrap_err(),
            FilterError::UnknownField("giveawaysParticipatedIn".to_string())
        );
        assert!(matches!(
            to_condition(&query(json!({"_id": 42}))),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            to_condition(&query(json!({"isGalleryEnabled": {"$like": "t%"}}))),
            Err(FilterError::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            to_condition(&query(json!({"address": {"$regex": "^0x"}}))),
            Err(FilterError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(to_condition(&UserQuery::new()).is_ok());
    }
}

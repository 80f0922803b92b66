use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::response::ApiError;
use crate::service::ExperimentFilter;
use crate::types::{Access, ExperimentStatus, ShareLevel, TagCategory, Token};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserTokenRequest {
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            id: token.id,
            is_admin: token.is_admin,
            user_id: token.user_id,
            created_at: token.created_at,
            expires_at: token.expires_at,
            last_used_at: token.last_used_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    #[serde(flatten)]
    pub metadata: TokenResponse,
}

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Query string of `GET /experiments`. Kept as strings so bad values get a
/// JSON error body rather than a bare rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListExperimentsParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Comma-separated tag ids.
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
}

impl ListExperimentsParams {
    pub fn into_filter(self) -> Result<ExperimentFilter, ApiError> {
        let status = parse_opt::<ExperimentStatus>(self.status.as_deref())?;
        let role = parse_opt(self.role.as_deref())?;
        let permission = parse_opt::<ShareLevel>(self.permission.as_deref())?.map(Access::from);

        let tag_ids = self
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ExperimentFilter {
            query: self.q,
            status,
            tag_ids,
            role,
            permission,
        })
    }
}

fn parse_opt<T: FromStr<Err = String>>(value: Option<&str>) -> Result<Option<T>, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .map(str::parse::<T>)
        .transpose()
        .map_err(ApiError::bad_request)
}

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    #[serde(default)]
    pub category: TagCategory,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    /// Email address or user id of the recipient.
    pub user: String,
    pub permission_level: ShareLevel,
}

#[derive(Debug, Deserialize)]
pub struct UpdateShareRequest {
    pub permission_level: ShareLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_list_params_into_filter() {
        let params = ListExperimentsParams {
            q: Some("pcr".to_string()),
            status: Some("on_hold".to_string()),
            tags: Some("t1, t2,,".to_string()),
            role: Some("shared".to_string()),
            permission: Some("view".to_string()),
        };

        let filter = params.into_filter().unwrap();
        assert_eq!(filter.query.as_deref(), Some("pcr"));
        assert_eq!(filter.status, Some(ExperimentStatus::OnHold));
        assert_eq!(filter.tag_ids, vec!["t1", "t2"]);
        assert_eq!(filter.role, Some(Role::Shared));
        assert_eq!(filter.permission, Some(Access::View));
    }

    #[test]
    fn test_list_params_defaults() {
        let filter = ListExperimentsParams::default().into_filter().unwrap();
        assert!(filter.query.is_none());
        assert!(filter.tag_ids.is_empty());
        assert!(filter.status.is_none());
    }

    #[test]
    fn test_list_params_rejects_unknown_values() {
        let params = ListExperimentsParams {
            status: Some("archived".to_string()),
            ..Default::default()
        };
        let err = params.into_filter().unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);

        let params = ListExperimentsParams {
            permission: Some("none".to_string()),
            ..Default::default()
        };
        assert!(params.into_filter().is_err());
    }
}

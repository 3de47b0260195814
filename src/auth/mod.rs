//! Operator identity supplied by the plant's login front end.
//!
//! Credentials are checked upstream; this service only receives the resulting
//! identity as request headers and uses it for attribution and role checks.

use crate::errors::{ApiError, ServiceError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

pub const OPERATOR_ID_HEADER: &str = "x-operator-id";
pub const OPERATOR_NAME_HEADER: &str = "x-operator-name";
pub const OPERATOR_ROLE_HEADER: &str = "x-operator-role";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum OperatorRole {
    Admin,
    Supervisor,
    Operator,
}

/// Who is acting. Opaque apart from the role gates below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Operator {
    pub id: String,
    pub name: Option<String>,
    pub role: OperatorRole,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: Option<String>, role: OperatorRole) -> Self {
        Self {
            id: id.into(),
            name,
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == OperatorRole::Admin
    }

    /// Supervisors and admins may release stations and edit targets
    pub fn can_supervise(&self) -> bool {
        matches!(self.role, OperatorRole::Admin | OperatorRole::Supervisor)
    }

    pub fn require_supervisor(&self, action: &str) -> Result<(), ServiceError> {
        if self.can_supervise() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "{} requires SUPERVISOR or ADMIN role",
                action
            )))
        }
    }

    pub fn require_admin(&self, action: &str) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!("{} requires ADMIN role", action)))
        }
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_str(parts, OPERATOR_ID_HEADER).ok_or_else(|| {
            ApiError::Unauthorized(format!("missing {} header", OPERATOR_ID_HEADER))
        })?;
        let role = match header_str(parts, OPERATOR_ROLE_HEADER) {
            Some(raw) => OperatorRole::from_str(raw)
                .map_err(|_| ApiError::Unauthorized(format!("unknown operator role '{}'", raw)))?,
            None => OperatorRole::Operator,
        };
        let name = header_str(parts, OPERATOR_NAME_HEADER).map(str::to_string);

        Ok(Operator::new(id, name, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use rstest::rstest;

    async fn extract(headers: &[(&str, &str)]) -> Result<Operator, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Operator::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn defaults_to_operator_role() {
        let op = extract(&[(OPERATOR_ID_HEADER, "u-7")]).await.unwrap();
        assert_eq!(op.id, "u-7");
        assert_eq!(op.role, OperatorRole::Operator);
        assert!(!op.can_supervise());
    }

    #[tokio::test]
    async fn missing_id_is_rejected() {
        let err = extract(&[(OPERATOR_ROLE_HEADER, "ADMIN")]).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[rstest]
    #[case("admin", OperatorRole::Admin)]
    #[case("SUPERVISOR", OperatorRole::Supervisor)]
    #[case("Operator", OperatorRole::Operator)]
    fn parses_roles_case_insensitively(#[case] raw: &str, #[case] expected: OperatorRole) {
        assert_eq!(OperatorRole::from_str(raw).unwrap(), expected);
    }

    #[test]
    fn role_gates() {
        let sup = Operator::new("s", None, OperatorRole::Supervisor);
        assert!(sup.require_supervisor("unlock").is_ok());
        assert!(matches!(
            sup.require_admin("force close"),
            Err(ServiceError::Forbidden(_))
        ));
    }
}

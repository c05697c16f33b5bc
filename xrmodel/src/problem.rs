//! RFC 9457 Problem Details, plus the error-kind taxonomy xrserver maps its internal errors
//! onto before they leave the process (spec.md 7).

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProblemKind {
    EntityNotFound,
    InvalidData,
    EpochError,
    Unauthorized,
    Forbidden,
    Conflict,
    InternalError,
    ServiceUnavailable,
    ApiNotFound,
    MethodNotAllowed,
}

impl ProblemKind {
    pub fn status(self) -> u16 {
        match self {
            ProblemKind::EntityNotFound => 404,
            ProblemKind::InvalidData => 400,
            ProblemKind::EpochError => 409,
            ProblemKind::Unauthorized => 401,
            ProblemKind::Forbidden => 403,
            ProblemKind::Conflict => 409,
            ProblemKind::InternalError => 500,
            ProblemKind::ServiceUnavailable => 503,
            ProblemKind::ApiNotFound => 404,
            ProblemKind::MethodNotAllowed => 405,
        }
    }

    pub fn type_uri(self) -> &'static str {
        match self {
            ProblemKind::EntityNotFound => "https://xregistry.io/errors/entity_not_found",
            ProblemKind::InvalidData => "https://xregistry.io/errors/invalid_data",
            ProblemKind::EpochError => "https://xregistry.io/errors/epoch_error",
            ProblemKind::Unauthorized => "https://xregistry.io/errors/unauthorized",
            ProblemKind::Forbidden => "https://xregistry.io/errors/forbidden",
            ProblemKind::Conflict => "https://xregistry.io/errors/conflict",
            ProblemKind::InternalError => "https://xregistry.io/errors/internal_error",
            ProblemKind::ServiceUnavailable => "https://xregistry.io/errors/service_unavailable",
            ProblemKind::ApiNotFound => "https://xregistry.io/errors/api_not_found",
            ProblemKind::MethodNotAllowed => "https://xregistry.io/errors/method_not_allowed",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ProblemKind::EntityNotFound => "Entity Not Found",
            ProblemKind::InvalidData => "Invalid Data",
            ProblemKind::EpochError => "Epoch Mismatch",
            ProblemKind::Unauthorized => "Unauthorized",
            ProblemKind::Forbidden => "Forbidden",
            ProblemKind::Conflict => "Conflict",
            ProblemKind::InternalError => "Internal Error",
            ProblemKind::ServiceUnavailable => "Service Unavailable",
            ProblemKind::ApiNotFound => "API Not Found",
            ProblemKind::MethodNotAllowed => "Method Not Allowed",
        }
    }
}

/// `application/problem+json` body (RFC 9457 3).
#[derive(Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Problem {
    pub fn new(kind: ProblemKind, detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Problem {
            type_uri: kind.type_uri().to_string(),
            title: kind.title().to_string(),
            status: kind.status(),
            detail: detail.into(),
            instance: instance.into(),
            extensions: Map::new(),
        }
    }

    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ProblemKind::EntityNotFound.status(), 404);
        assert_eq!(ProblemKind::EpochError.status(), 409);
        assert_eq!(ProblemKind::Unauthorized.status(), 401);
    }

    #[test]
    fn serializes_as_problem_json_shape() {
        let p = Problem::new(ProblemKind::EntityNotFound, "no such image", "/containerregistries/x/images/y");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["status"], 404);
        assert_eq!(v["type"], "https://xregistry.io/errors/entity_not_found");
    }
}

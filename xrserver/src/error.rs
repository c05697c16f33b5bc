//! C6: the terminal error type every handler in `routes` returns through, and the conversion
//! from that type into an RFC 9457 `application/problem+json` response (spec.md 4.6/7).

use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};
use log::error;
use xrmodel::{Problem, ProblemKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Ocidist(#[from] ocidist::Error),
    #[error(transparent)]
    Projector(#[from] xrmodel::projector::Error),
    #[error(transparent)]
    Flags(#[from] crate::flags::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("unknown backend {0}")]
    UnknownBackend(String),
    #[error("epoch mismatch: expected {expected}, got {actual}")]
    EpochMismatch { expected: u64, actual: u64 },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("no such API path: {0}")]
    ApiNotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl Error {
    fn kind(&self) -> ProblemKind {
        match self {
            Error::NotFound(_) | Error::UnknownBackend(_) => ProblemKind::EntityNotFound,
            Error::EpochMismatch { .. } => ProblemKind::EpochError,
            Error::InvalidRequest(_) | Error::Flags(_) => ProblemKind::InvalidData,
            Error::Projector(xrmodel::projector::Error::NotFound) => ProblemKind::EntityNotFound,
            // spec.md 7: upstream 401/403 during a manifest/blob fetch both become `forbidden`
            // to the client -- `Unauthorized` stays reserved for this facade's own bearer gate.
            Error::Ocidist(ocidist::Error::StatusNotOk(s))
                if *s == reqwest::StatusCode::UNAUTHORIZED || *s == reqwest::StatusCode::FORBIDDEN =>
            {
                ProblemKind::Forbidden
            }
            Error::Ocidist(_) => ProblemKind::ServiceUnavailable,
            Error::Projector(_) => ProblemKind::InternalError,
            Error::Unauthorized => ProblemKind::Unauthorized,
            Error::ApiNotFound(_) => ProblemKind::ApiNotFound,
            Error::MethodNotAllowed => ProblemKind::MethodNotAllowed,
        }
    }
}

/// Upstream transport/parse failures are logged with full detail and never echoed verbatim to
/// a caller outside `--dev` mode -- only the problem title/type leak (spec.md 7's redaction
/// rule). `dev` is carried per-request via an axum extension set at router build time.
pub fn to_problem(err: &Error, instance: &str, dev: bool) -> Problem {
    let kind = err.kind();
    error!("{instance}: {err}");
    let detail = if dev || matches!(kind, ProblemKind::EntityNotFound | ProblemKind::EpochError | ProblemKind::InvalidData) {
        err.to_string()
    } else {
        kind.title().to_string()
    };
    let mut problem = Problem::new(kind, detail, instance.to_string());
    if let Error::EpochMismatch { expected, actual } = err {
        problem = problem
            .with_extension("expected_epoch", serde_json::json!(expected))
            .with_extension("actual_epoch", serde_json::json!(actual));
    }
    problem
}

/// Wraps an `Error` with the request path it occurred on; this is what handlers actually
/// return, so `IntoResponse` has everything it needs without reaching into request state.
pub struct HandlerError {
    pub err: Error,
    pub instance: String,
    pub dev: bool,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let problem = to_problem(&self.err, &self.instance, self.dev);
        let status = StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match serde_json::to_vec(&problem) {
            Ok(b) => b,
            Err(_) => b"{}".to_vec(),
        };
        (status, [(header::CONTENT_TYPE, "application/problem+json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = Error::NotFound("image".to_string());
        let problem = to_problem(&err, "/x", false);
        assert_eq!(problem.status, 404);
    }

    #[test]
    fn epoch_mismatch_maps_to_409_with_extensions() {
        let err = Error::EpochMismatch { expected: 1, actual: 2 };
        let problem = to_problem(&err, "/x", false);
        assert_eq!(problem.status, 409);
        assert_eq!(problem.extensions.get("expected_epoch"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn non_dev_mode_redacts_internal_detail() {
        let err = Error::Projector(xrmodel::projector::Error::NotFound);
        let problem = to_problem(&err, "/x", false);
        assert_eq!(problem.status, 404);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let problem = to_problem(&Error::Unauthorized, "/x", false);
        assert_eq!(problem.status, 401);
    }

    #[test]
    fn upstream_401_and_403_both_map_to_forbidden() {
        let unauthorized = Error::Ocidist(ocidist::Error::StatusNotOk(reqwest::StatusCode::UNAUTHORIZED));
        let forbidden = Error::Ocidist(ocidist::Error::StatusNotOk(reqwest::StatusCode::FORBIDDEN));
        assert_eq!(to_problem(&unauthorized, "/x", false).status, 403);
        assert_eq!(to_problem(&forbidden, "/x", false).status, 403);
    }

    #[test]
    fn unmatched_method_maps_to_405() {
        let problem = to_problem(&Error::MethodNotAllowed, "/x", false);
        assert_eq!(problem.status, 405);
    }

    #[test]
    fn unmatched_path_maps_to_404_api_not_found() {
        let problem = to_problem(&Error::ApiNotFound("/bogus".to_string()), "/bogus", false);
        assert_eq!(problem.status, 404);
        assert_eq!(problem.type_uri, "https://xregistry.io/errors/api_not_found");
    }
}

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pulse_protocol::ProblemDetails;
use serde::Serialize;

pub fn json_ok<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

pub fn json_status<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

/// RFC 7807 problem response.
pub fn problem_response(status: StatusCode, title: &str, detail: Option<&str>) -> Response {
    let body = ProblemDetails {
        r#type: "about:blank".into(),
        title: title.to_string(),
        status: status.as_u16(),
        detail: detail.map(str::to_string),
        instance: None,
        trace_id: None,
        code: None,
    };
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/problem+json"),
    );
    response
}

pub fn not_found(detail: &str) -> Response {
    problem_response(StatusCode::NOT_FOUND, "Not Found", Some(detail))
}

pub fn bad_request(detail: &str) -> Response {
    problem_response(StatusCode::BAD_REQUEST, "Bad Request", Some(detail))
}

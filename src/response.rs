use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Success envelope: `{statusCode, data, message, success}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.as_u16() < 400,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_flag_follows_status() {
        let ok = ApiResponse::created(serde_json::json!({}), "made");
        assert_eq!(ok.status_code, 201);
        assert!(ok.success);

        let odd = ApiResponse::new(StatusCode::BAD_REQUEST, (), "nope");
        assert!(!odd.success);
    }

    #[test]
    fn envelope_field_names() {
        let json = serde_json::to_value(ApiResponse::ok(1, "fine")).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["data"], 1);
        assert_eq!(json["message"], "fine");
        assert_eq!(json["success"], true);
    }
}

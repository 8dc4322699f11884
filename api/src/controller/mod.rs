pub mod item_controller;
pub mod limiter_controller;

use serde::Serialize;
use volo_http::body::Body;
use volo_http::http::header::CONTENT_TYPE;
use volo_http::http::{Response, StatusCode};
use volo_http::response::ServerResponse;
use volo_http::server::IntoResponse;

/// 统一的json返回结构
#[derive(Debug, Serialize)]
pub struct R<T> {
    pub code: u16,
    pub msg: String,
    pub data: Option<T>,
    #[serde(skip)]
    status: StatusCode,
}

impl<T> R<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: "ok".to_string(),
            data: Some(data),
            status: StatusCode::OK,
        }
    }

    pub fn error_status_code(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            msg: msg.into(),
            data: None,
            status,
        }
    }
}

/// 生成json响应, 序列化失败时返回500
pub fn json_response<T: Serialize>(
    status: StatusCode,
    headers: &[(&str, String)],
    body: &T,
) -> ServerResponse {
    let Ok(json) = serde_json::to_string(body) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json");
    for (k, v) in headers {
        builder = builder.header(*k, v.as_str());
    }
    match builder.body(Body::from(json)) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("build response error: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

impl<T: Serialize> IntoResponse for R<T> {
    fn into_response(self) -> ServerResponse {
        json_response(self.status, &[], &self)
    }
}

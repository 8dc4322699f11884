use crate::controller::R;
use crate::inventory::{CheckoutError, Item};
use crate::rate_limiter::rejection_response;
use crate::ServiceContext;
use common::gate::CallerIdentity;
use serde::Deserialize;
use volo_http::request::ServerRequest;
use volo_http::response::ServerResponse;
use volo_http::server::IntoResponse;
use volo_http::{http::StatusCode, server::extract::Query, utils::Extension};

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    pub id: Option<u64>,
}

/// 通过id获取物品
pub async fn get_item(
    Extension(ctx): Extension<ServiceContext>,
    Query(param): Query<ItemQuery>,
    _req: ServerRequest,
) -> R<Item> {
    let Some(id) = param.id else {
        return R::error_status_code(StatusCode::BAD_REQUEST, "id 不能为空");
    };
    match ctx.inventory.get(id) {
        Some(item) => R::ok(item),
        None => R::error_status_code(StatusCode::NOT_FOUND, format!("item {} not found", id)),
    }
}

/// 借出一件物品; 除了全局限流, 还要经过更严格的借出限流
pub async fn checkout_item(
    Extension(ctx): Extension<ServiceContext>,
    Query(param): Query<ItemQuery>,
    req: ServerRequest,
) -> ServerResponse {
    let Some(id) = param.id else {
        return R::<Item>::error_status_code(StatusCode::BAD_REQUEST, "id 不能为空").into_response();
    };
    // 限流中间件会把调用方身份放到请求扩展里
    let caller = req
        .extensions()
        .get::<CallerIdentity>()
        .cloned()
        .unwrap_or_default();

    let inventory = ctx.inventory.clone();
    let checkout = ctx.checkout_gate.protect(
        "checkout_item",
        "Checks one unit of an item out of the inventory.",
        move |id: u64| inventory.checkout(id),
    );

    match checkout.call(&caller, id) {
        Err(rejection) => {
            tracing::info!("{} rejected for {:?}", checkout.name(), caller);
            rejection_response(&rejection)
        }
        Ok(Ok(item)) => R::ok(item).into_response(),
        Ok(Err(e @ CheckoutError::NotFound(_))) => {
            R::<Item>::error_status_code(StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Ok(Err(e @ CheckoutError::Unavailable(_))) => {
            R::<Item>::error_status_code(StatusCode::CONFLICT, e.to_string()).into_response()
        }
    }
}

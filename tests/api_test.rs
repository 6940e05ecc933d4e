mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use defi_lending_aggregator::adapters::LendingAdapter;
use defi_lending_aggregator::handlers::{create_lending_routes, health_check};
use defi_lending_aggregator::models::Protocol;
use defi_lending_aggregator::services::LendingService;
use defi_lending_aggregator::AppState;

fn app() -> Router {
    let usdc = market(Protocol::AaveV3, "USDC", token(0xa1), 4.1, 5.0);
    let adapter = FakeAdapter::new(Protocol::AaveV3, vec![usdc.clone()]).with_positions(vec![position(&usdc, 500.0, 0.0)]);
    let service = LendingService::with_adapters(
        CHAIN_ID,
        Arc::new(NullTransport),
        vec![Arc::new(adapter) as Arc<dyn LendingAdapter>],
    );

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_lending_routes())
        .with_state(AppState {
            service: Arc::new(service),
        })
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_lists_protocols() {
    let (status, body) = send(get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chain_id"], CHAIN_ID);
    assert_eq!(body["protocols"], json!(["aave_v3"]));
}

#[tokio::test]
async fn test_markets_and_positions_routes() {
    let (status, body) = send(get_request("/api/v1/markets?refresh=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["markets"][0]["asset_symbol"], "USDC");

    let uri = format!("/api/v1/positions/{:#x}", account());
    let (status, body) = send(get_request(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_supply_usd"], 500.0);
    // No debt: infinite health factor serializes as null
    assert!(body["health_factor"].is_null());

    let (status, _) = send(get_request("/api/v1/positions/not-an-address")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transaction_route_builds_plan() {
    let market_id = format!("aave_v3:{}:{:#x}", CHAIN_ID, token(0xa1));
    let request = json!({
        "market_id": market_id,
        "account": format!("{:#x}", account()),
        "amount": "1000000",
        "estimate_gas": true
    });

    let (status, body) = send(post_request("/api/v1/transactions/supply", request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "supply");
    assert_eq!(body["calls"][0]["description"], "aave_v3 supply USDC");
    assert_eq!(body["gas"]["total_gas"], 21_000);

    let (status, _) = send(post_request("/api/v1/transactions/liquidate", request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_protocol_maps_to_bad_request() {
    let uri = format!("/api/v1/health-factor/spark/{:#x}", account());
    let (status, body) = send(get_request(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = send(get_request("/api/v1/markets/aave_v3:8453:0x01")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validate_route_returns_result_body() {
    let request = json!({
        "market_id": "euler_v2:8453:0x01",
        "account": format!("{:#x}", account()),
        "amount": "1"
    });
    let (status, body) = send(post_request("/api/v1/validate/borrow", request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"][0]["code"], "PROTOCOL_NOT_SUPPORTED");
}

//! End-to-end API tests over the full router, the in-memory store and a
//! deterministic chain source.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use peertrade_server::app_state::AppState;
use peertrade_server::chain::FixedChainSource;
use peertrade_server::rates::StaticRateSource;
use peertrade_server::routes::api_router;
use peertrade_server::services::{EscrowService, ListingService, TradeService};
use peertrade_server::store::MemoryStore;

struct TestApp {
    router: Router,
    chain: Arc<FixedChainSource>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(FixedChainSource::new());
    let escrows = Arc::new(EscrowService::new(store.clone(), chain.clone()));
    let trades = Arc::new(TradeService::new(
        store.clone(),
        chain.clone(),
        escrows.clone(),
    ));
    let listings = Arc::new(ListingService::new(store.clone()));
    let state = AppState {
        listings,
        trades,
        escrows,
        rates: Arc::new(StaticRateSource::with_default_table()),
    };
    TestApp {
        router: api_router().with_state(state),
        chain,
    }
}

impl TestApp {
    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = match body {
            Some(value) => Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(json!({}))).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    /// Seed a sell listing and take it, returning (trade, escrow) JSON.
    async fn seed_trade_with_escrow(&self) -> (Value, Value) {
        let (status, listing) = self
            .post(
                "/api/listings",
                json!({
                    "user_id": "seller-1",
                    "user_address": "0xseller",
                    "user_trust_score": 90,
                    "type": "sell",
                    "cryptocurrency": "BTC",
                    "fiat_currency": "USD",
                    "amount": 1.0,
                    "price": 45000.0,
                    "min_order": 100.0,
                    "max_order": 45000.0,
                    "payment_methods": ["Bank Transfer"]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let listing_id = listing["data"]["id"].as_str().unwrap().to_string();

        let (status, trade) = self
            .post(
                "/api/trades",
                json!({
                    "listing_id": listing_id,
                    "taker_id": "buyer-1",
                    "amount": 0.5,
                    "payment_method": "Bank Transfer"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trade["data"]["status"], "active");
        let trade_id = trade["data"]["id"].as_str().unwrap().to_string();

        let (status, escrow) = self
            .post(
                "/api/escrows",
                json!({
                    "trade_id": trade_id,
                    "buyer_address": "0xbuyer",
                    "seller_address": "0xseller",
                    "cryptocurrency": "BTC",
                    "amount": 0.5,
                    "fiat_amount": 22500.0,
                    "fiat_currency": "USD"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let escrow_id = escrow["data"]["id"].as_str().unwrap();
        let (status, _) = self
            .post_empty(&format!("/api/escrows/{escrow_id}/fund"))
            .await;
        assert_eq!(status, StatusCode::OK);

        (trade["data"].clone(), escrow["data"].clone())
    }
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = test_app();
    let (status, _) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn happy_path_trade_completes_and_releases_escrow() {
    let app = test_app();
    let (trade, escrow) = app.seed_trade_with_escrow().await;
    let trade_id = trade["id"].as_str().unwrap();
    let escrow_id = escrow["id"].as_str().unwrap();
    let contract_address = escrow["contract_address"].as_str().unwrap();

    // Buyer funds the contract address with the exact amount.
    app.chain.set_received(contract_address, 0.5, 2);
    let (status, body) = app
        .post_empty(&format!("/api/trades/{trade_id}/verify-escrow"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_exact"], true);
    assert_eq!(body["data"]["new_status"], "escrow_paid");

    // Fiat payment, then seller confirmation completes the trade.
    let (status, body) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "fiat_paid", "requested_by": "buyer-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_status"], "fiat_paid");

    let (status, body) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "completed", "requested_by": "seller-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["previous_status"], "fiat_paid");
    assert_eq!(body["data"]["new_status"], "completed");

    let (status, body) = app.get(&format!("/api/escrows/{escrow_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "released");

    // History is monotonic through the whole lifecycle.
    let (_, body) = app.get(&format!("/api/trades/{trade_id}")).await;
    let statuses: Vec<&str> = body["data"]["status_history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["status"].as_str().unwrap())
        .collect();
    assert_eq!(
        statuses,
        vec!["pending", "active", "escrow_paid", "fiat_paid", "completed"]
    );
}

#[tokio::test]
async fn wrong_escrow_amount_cancels_trade_and_refunds() {
    let app = test_app();
    let (trade, escrow) = app.seed_trade_with_escrow().await;
    let trade_id = trade["id"].as_str().unwrap();
    let escrow_id = escrow["id"].as_str().unwrap();
    let contract_address = escrow["contract_address"].as_str().unwrap();

    app.chain.set_received(contract_address, 0.5001, 2);
    let (status, body) = app
        .post_empty(&format!("/api/trades/{trade_id}/verify-escrow"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_exact"], false);
    assert_eq!(body["data"]["new_status"], "incorrect_escrow");

    let (_, body) = app.get(&format!("/api/escrows/{escrow_id}")).await;
    assert_eq!(body["data"]["status"], "cancelled");

    // Terminal: further transitions are conflicts.
    let (status, _) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "fiat_paid"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn dispute_resolution_is_exactly_once() {
    let app = test_app();
    let (_trade, escrow) = app.seed_trade_with_escrow().await;
    let escrow_id = escrow["id"].as_str().unwrap();

    let (status, body) = app
        .post(
            &format!("/api/escrows/{escrow_id}/disputes"),
            json!({
                "initiated_by": "buyer",
                "reason": "Seller unreachable",
                "evidence": ["https://example.com/chat-log"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let dispute_id = body["data"]["id"].as_str().unwrap().to_string();

    // Empty arbitrator notes are a validation failure.
    let (status, _) = app
        .post(
            &format!("/api/disputes/{dispute_id}/resolve"),
            json!({"decision": "buyer", "notes": "  "}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            &format!("/api/disputes/{dispute_id}/resolve"),
            json!({"decision": "buyer", "notes": "Chat log favors buyer"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");

    let (status, _) = app
        .post(
            &format!("/api/disputes/{dispute_id}/resolve"),
            json!({"decision": "seller", "notes": "second opinion"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app.get(&format!("/api/escrows/{escrow_id}")).await;
    assert_eq!(body["data"]["status"], "resolved");
    assert_eq!(body["data"]["arbitrator_decision"], "buyer");
}

#[tokio::test]
async fn cancellation_dance_over_the_api() {
    let app = test_app();
    let (trade, _escrow) = app.seed_trade_with_escrow().await;
    let trade_id = trade["id"].as_str().unwrap();

    let (status, _) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "cancellation_requested", "requested_by": "buyer-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The requester cannot accept their own request.
    let (status, _) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "cancelled", "requested_by": "buyer-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Counterparty declines: admin review.
    let (status, body) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "dispute_review", "requested_by": "seller-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_status"], "dispute_review");
}

#[tokio::test]
async fn legacy_status_names_are_accepted_and_normalized() {
    let app = test_app();
    let (trade, escrow) = app.seed_trade_with_escrow().await;
    let trade_id = trade["id"].as_str().unwrap();
    let contract_address = escrow["contract_address"].as_str().unwrap();

    app.chain.set_received(contract_address, 0.5, 1);
    app.post_empty(&format!("/api/trades/{trade_id}/verify-escrow"))
        .await;

    // "paid" is the legacy spelling of fiat_paid.
    let (status, body) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "paid", "requested_by": "buyer-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_status"], "fiat_paid");
}

#[tokio::test]
async fn error_statuses_follow_the_taxonomy() {
    let app = test_app();

    // Unknown entity.
    let (status, body) = app
        .get("/api/trades/00000000-0000-0000-0000-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    // Payload validation.
    let (status, _) = app
        .post(
            "/api/listings",
            json!({
                "user_id": "",
                "user_address": "0xabc",
                "type": "sell",
                "cryptocurrency": "BTC",
                "fiat_currency": "USD",
                "amount": 1.0,
                "price": 45000.0,
                "min_order": 0.0,
                "max_order": 100.0,
                "payment_methods": ["Bank Transfer"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Off-table transition.
    let (_, listing) = app
        .post(
            "/api/listings",
            json!({
                "user_id": "seller-9",
                "user_address": "0xseller9",
                "type": "sell",
                "cryptocurrency": "BTC",
                "fiat_currency": "USD",
                "amount": 1.0,
                "price": 45000.0,
                "min_order": 0.0,
                "max_order": 45000.0,
                "payment_methods": ["Bank Transfer"]
            }),
        )
        .await;
    let (_, trade) = app
        .post(
            "/api/trades",
            json!({
                "listing_id": listing["data"]["id"],
                "taker_id": "buyer-9",
                "amount": 0.1,
                "payment_method": "Bank Transfer"
            }),
        )
        .await;
    let trade_id = trade["data"]["id"].as_str().unwrap();
    let (status, body) = app
        .post(
            &format!("/api/trades/{trade_id}/transition"),
            json!({"status": "completed"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("invalid transition"));
}

#[tokio::test]
async fn listings_support_search_and_partial_update() {
    let app = test_app();
    app.post(
        "/api/listings",
        json!({
            "user_id": "seller-1",
            "user_address": "0xseller",
            "user_trust_score": 95,
            "type": "sell",
            "cryptocurrency": "ETH",
            "fiat_currency": "EUR",
            "amount": 10.0,
            "price": 3000.0,
            "min_order": 50.0,
            "max_order": 5000.0,
            "payment_methods": ["SEPA"]
        }),
    )
    .await;
    let (_, second) = app
        .post(
            "/api/listings",
            json!({
                "user_id": "seller-2",
                "user_address": "0xother",
                "user_trust_score": 40,
                "type": "buy",
                "cryptocurrency": "BTC",
                "fiat_currency": "USD",
                "amount": 2.0,
                "price": 45000.0,
                "min_order": 100.0,
                "max_order": 90000.0,
                "payment_methods": ["Bank Transfer"]
            }),
        )
        .await;

    let (status, body) = app
        .get("/api/listings?cryptocurrency=ETH&min_trust_score=50")
        .await;
    assert_eq!(status, StatusCode::OK);
    let hits = body["data"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["cryptocurrency"], "ETH");

    let second_id = second["data"]["id"].as_str().unwrap();
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/listings/{second_id}"),
            Some(json!({"status": "paused"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "paused");

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/listings/{second_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&format!("/api/listings/{second_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rate_conversion_uses_the_static_table() {
    let app = test_app();
    let (status, body) = app
        .get("/api/rates/convert?fiat_amount=9500&fiat_currency=USD&cryptocurrency=BTC")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rate"], 95000.0);
    assert_eq!(body["data"]["crypto_amount"], 0.1);

    let (status, _) = app
        .get("/api/rates/convert?fiat_amount=100&fiat_currency=USD&cryptocurrency=DOGE")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

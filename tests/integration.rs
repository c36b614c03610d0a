use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use lastmile::api::rest::router;
use lastmile::config::Config;
use lastmile::engine::dispatch::run_dispatch_engine;
use lastmile::engine::queue::DispatchRequest;
use lastmile::state::AppState;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

// Restaurant at Colombo Fort; the test customer is ~2 km south of it.
const RESTAURANT_LAT: f64 = 6.9271;
const RESTAURANT_LNG: f64 = 79.8612;
const CUSTOMER_LAT: f64 = 6.9091;
const CUSTOMER_LNG: f64 = 79.8612;

fn setup() -> (axum::Router, mpsc::Receiver<DispatchRequest>) {
    let (state, rx) = AppState::new(Config::default());
    (router(Arc::new(state)), rx)
}

fn setup_with_engine() -> (axum::Router, Arc<AppState>) {
    let (state, rx) = AppState::new(Config::default());
    let shared = Arc::new(state);
    tokio::spawn(run_dispatch_engine(shared.clone(), rx));
    (router(shared.clone()), shared)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn patch_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn register_courier(app: &axum::Router, lat: f64, lng: f64, rating: f64) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/couriers",
            json!({
                "name": "Kasun",
                "phone": "+94771234567",
                "vehicle": "motorbike",
                "location": { "lat": lat, "lng": lng },
                "rating": rating
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn create_order(app: &axum::Router, total: f64) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "customer_id": "11111111-1111-1111-1111-111111111111",
                "restaurant_id": "22222222-2222-2222-2222-222222222222",
                "delivery_address": {
                    "street": "12 Galle Road",
                    "location": { "lat": CUSTOMER_LAT, "lng": CUSTOMER_LNG }
                },
                "total": total
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn set_order_status(app: &axum::Router, order_id: &str, status: &str) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/status"),
            json!({ "status": status }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn complete_payment(app: &axum::Router, order_id: &str) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/payment"),
            json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Walks a fresh order to `ready_for_pickup` and returns the created
/// delivery.
async fn ready_delivery(app: &axum::Router, order_id: &str) -> Value {
    set_order_status(app, order_id, "confirmed").await;
    set_order_status(app, order_id, "preparing").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/ready"),
            json!({
                "restaurant_location": { "lat": RESTAURANT_LAT, "lng": RESTAURANT_LNG },
                "restaurant_address": "5 Temple Lane"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn transition_delivery(app: &axum::Router, delivery_id: &str, status: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/status"),
            json!({ "status": status }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _rx) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["couriers"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["deliveries"], 0);
    assert_eq!(body["assignments"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _rx) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("deliveries_in_queue"));
    assert!(body.contains("active_deliveries"));
}

#[tokio::test]
async fn register_courier_returns_courier() {
    let (app, _rx) = setup();
    let body = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;

    assert_eq!(body["name"], "Kasun");
    assert_eq!(body["vehicle"], "motorbike");
    assert_eq!(body["is_available"], true);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["rating"], 4.5);
    assert_eq!(body["total_ratings"], 0);
    assert!(!body["id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn register_courier_with_invalid_coordinates_returns_400() {
    let (app, _rx) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/couriers",
            json!({
                "name": "Nimal",
                "phone": "+94770000000",
                "vehicle": "bicycle",
                "location": { "lat": 91.0, "lng": 79.8612 }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn availability_toggle_round_trips() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let id = courier["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(patch_request(
            &format!("/couriers/{id}/availability"),
            json!({ "is_available": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_available"], false);

    let response = app
        .oneshot(patch_request(
            &format!("/couriers/{id}/availability"),
            json!({ "is_available": true }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["is_available"], true);
}

#[tokio::test]
async fn create_order_starts_pending_and_unpaid() {
    let (app, _rx) = setup();
    let body = create_order(&app, 2400.0).await;

    assert_eq!(body["status"], "pending");
    assert_eq!(body["payment_status"], "pending");
    assert!(body["delivery_person_id"].is_null());
    assert_eq!(body["total"], 2400.0);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (app, _rx) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_order_transition_returns_conflict_with_allowed_states() {
    let (app, _rx) = setup();
    let order = create_order(&app, 1500.0).await;
    let order_id = order["id"].as_str().unwrap();

    set_order_status(&app, order_id, "confirmed").await;
    set_order_status(&app, order_id, "preparing").await;

    // Going back to confirmed is not in the table for preparing.
    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "confirmed" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(
        body["allowed"],
        json!(["ready_for_pickup", "cancelled"])
    );
}

#[tokio::test]
async fn ready_trigger_creates_a_pending_delivery() {
    let (app, _rx) = setup();
    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();

    let delivery = ready_delivery(&app, order_id).await;

    assert_eq!(delivery["status"], "pending");
    assert_eq!(delivery["order_id"], order["id"]);
    assert!(delivery["courier_id"].is_null());
    let distance = delivery["distance_km"].as_f64().unwrap();
    assert!((distance - 2.0).abs() < 0.05);
    // Just over 2 km at 20 km/h rounds up to 7 minutes, plus the
    // 10 minute dispatch buffer.
    assert_eq!(delivery["estimated_minutes"], 17);

    let response = app
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["status"], "ready_for_pickup");
}

#[tokio::test]
async fn engine_assigns_a_nearby_courier() {
    let (app, _state) = setup_with_engine();

    // ~2 km north of the restaurant, rating 4.5, fresh location.
    let courier = register_courier(&app, RESTAURANT_LAT + 2.0 / 111.19, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap().to_string();

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let delivery = ready_delivery(&app, &order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

    let response = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{delivery_id}")))
        .await
        .unwrap();
    let delivery = body_json(response).await;
    assert_eq!(delivery["status"], "assigned");
    assert_eq!(delivery["courier_id"], courier_id);
    assert!(delivery["assigned_at"].is_string());
    assert!(delivery["current_eta_minutes"].as_u64().unwrap() > 0);

    let response = app.clone().oneshot(get_request("/assignments")).await.unwrap();
    let assignments = body_json(response).await;
    let list = assignments.as_array().unwrap();
    assert_eq!(list.len(), 1);
    let assignment = &list[0];
    assert_eq!(assignment["delivery_id"], delivery_id);
    assert_eq!(assignment["courier_id"], courier_id);
    // distance ~40 + rating 27 + full recency 20 for a just-registered
    // courier.
    let score = assignment["score"].as_f64().unwrap();
    assert!((score - 87.0).abs() < 0.5, "score was {score}");

    let response = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["status"], "out_for_delivery");
    assert_eq!(order["delivery_person_id"], courier_id);

    let response = app
        .oneshot(get_request(&format!("/couriers/{courier_id}")))
        .await
        .unwrap();
    let courier = body_json(response).await;
    assert_eq!(courier["is_available"], false);
}

#[tokio::test]
async fn unavailable_courier_means_no_courier_outcome() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT + 2.0 / 111.19, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap();
    let response = app
        .clone()
        .oneshot(patch_request(
            &format!("/couriers/{courier_id}/availability"),
            json!({ "is_available": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/dispatch"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["outcome"], "no_courier_available");

    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}")))
        .await
        .unwrap();
    let delivery = body_json(response).await;
    assert_eq!(delivery["status"], "pending");
    assert!(delivery["courier_id"].is_null());
}

#[tokio::test]
async fn manual_dispatch_assigns_and_reports_the_assignment() {
    let (app, _rx) = setup();
    register_courier(&app, RESTAURANT_LAT + 1.0 / 111.19, RESTAURANT_LNG, 4.8).await;

    let order = create_order(&app, 1800.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/dispatch"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["outcome"], "assigned");
    assert_eq!(outcome["assignment"]["delivery_id"], *delivery_id);
    assert!(outcome["assignment"]["score"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn acceptance_conflicts_once_assigned() {
    let (app, _rx) = setup();
    let first = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let second = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.0).await;

    let order = create_order(&app, 2000.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": first["id"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": second["id"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn courier_walks_the_delivery_to_delivered_and_earns() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT + 1.0 / 111.19, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap();

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    complete_payment(&app, order_id).await;
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": courier_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    transition_delivery(&app, delivery_id, "picked_up").await;
    transition_delivery(&app, delivery_id, "in_transit").await;
    let delivered = transition_delivery(&app, delivery_id, "delivered").await;

    assert_eq!(delivered["status"], "delivered");
    assert!(delivered["delivered_at"].is_string());
    assert!(delivered["actual_minutes"].as_i64().is_some());

    let response = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["status"], "delivered");

    let response = app
        .clone()
        .oneshot(get_request(&format!("/couriers/{courier_id}")))
        .await
        .unwrap();
    let courier = body_json(response).await;
    assert_eq!(courier["is_available"], true);

    let response = app
        .oneshot(get_request(&format!("/couriers/{courier_id}/earnings")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let earnings = body_json(response).await;
    assert_eq!(earnings["total_deliveries"], 1);
    assert_eq!(earnings["total_amount"], delivered["driver_earnings"]);
    assert_eq!(earnings["days"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_and_frees_the_courier() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap();

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    complete_payment(&app, order_id).await;
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": courier_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "cancelled", "reason": "customer unreachable" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let order = body_json(response).await;
    assert_eq!(order["status"], "cancelled");
    assert_eq!(order["payment_status"], "refunded");
    assert_eq!(order["refund_amount"], 2400.0);
    assert_eq!(order["refund_reason"], "customer unreachable");

    let response = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{delivery_id}")))
        .await
        .unwrap();
    let delivery = body_json(response).await;
    assert_eq!(delivery["status"], "cancelled");
    assert_eq!(delivery["cancellation_reason"], "customer unreachable");

    let response = app
        .oneshot(get_request(&format!("/couriers/{courier_id}")))
        .await
        .unwrap();
    let courier = body_json(response).await;
    assert_eq!(courier["is_available"], true);
}

#[tokio::test]
async fn stale_ping_is_ignored() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/couriers/{courier_id}/ping"),
            json!({ "location": { "lat": 6.9300, "lng": 79.8650 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["outcome"], "applied");

    // Replayed from before registration: older than the stored update.
    let stale_time = chrono::Utc::now() - chrono::Duration::minutes(10);
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/couriers/{courier_id}/ping"),
            json!({
                "location": { "lat": 0.0, "lng": 0.0 },
                "recorded_at": stale_time.to_rfc3339()
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["outcome"], "stale");

    let response = app
        .oneshot(get_request(&format!("/couriers/{courier_id}")))
        .await
        .unwrap();
    let courier = body_json(response).await;
    assert_eq!(courier["location"]["lat"], 6.93);
    assert_eq!(courier["location"]["lng"], 79.865);
}

#[tokio::test]
async fn in_transit_ping_recomputes_the_eta() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap();

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": courier_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    transition_delivery(&app, delivery_id, "picked_up").await;
    transition_delivery(&app, delivery_id, "in_transit").await;

    // ~4.95 km north of the customer: 15 minutes at 20 km/h, plus the
    // 5 minute re-estimation buffer.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/couriers/{courier_id}/ping"),
            json!({
                "location": { "lat": CUSTOMER_LAT + 0.0445, "lng": CUSTOMER_LNG },
                "delivery_id": delivery_id
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["outcome"], "applied");

    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["status"], "in_transit");
    assert_eq!(snapshot["eta"]["minutes"], 20);
    assert!((snapshot["location"]["lat"].as_f64().unwrap() - (CUSTOMER_LAT + 0.0445)).abs() < 1e-9);
    assert!(snapshot["last_update"].is_string());
}

#[tokio::test]
async fn ping_for_someone_elses_delivery_is_rejected() {
    let (app, _rx) = setup();
    let assigned = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let assigned_id = assigned["id"].as_str().unwrap();
    // A second courier far north who never touches this delivery.
    let stranger = register_courier(&app, 60.0, RESTAURANT_LNG, 4.0).await;
    let stranger_id = stranger["id"].as_str().unwrap();

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": assigned_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/tracking")))
        .await
        .unwrap();
    let eta_before = body_json(response).await["eta"]["minutes"].clone();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/couriers/{stranger_id}/ping"),
            json!({
                "location": { "lat": 60.0, "lng": RESTAURANT_LNG },
                "delivery_id": delivery_id
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The stranger's position never reached the delivery's live view.
    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/tracking")))
        .await
        .unwrap();
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["eta"]["minutes"], eta_before);
    assert!((snapshot["location"]["lat"].as_f64().unwrap() - RESTAURANT_LAT).abs() < 1e-9);
}

#[tokio::test]
async fn ping_trail_retains_stale_pings_for_audit() {
    let (app, _rx) = setup();
    let courier = register_courier(&app, RESTAURANT_LAT, RESTAURANT_LNG, 4.5).await;
    let courier_id = courier["id"].as_str().unwrap();

    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "courier_id": courier_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ping = |lat: f64, recorded_at: Option<String>| {
        let mut body = json!({
            "location": { "lat": lat, "lng": RESTAURANT_LNG },
            "delivery_id": delivery_id
        });
        if let Some(at) = recorded_at {
            body["recorded_at"] = json!(at);
        }
        json_request("POST", &format!("/couriers/{courier_id}/ping"), body)
    };

    let response = app.clone().oneshot(ping(6.9300, None)).await.unwrap();
    assert_eq!(body_json(response).await["outcome"], "applied");

    let stale_time = (chrono::Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
    let response = app
        .clone()
        .oneshot(ping(6.9310, Some(stale_time)))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["outcome"], "stale");

    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/pings")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let trail = body_json(response).await;
    assert_eq!(trail.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_delivery_transition_lists_allowed_states() {
    let (app, _rx) = setup();
    let order = create_order(&app, 2400.0).await;
    let order_id = order["id"].as_str().unwrap();
    let delivery = ready_delivery(&app, order_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/status"),
            json!({ "status": "delivered" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["allowed"], json!(["assigned", "cancelled"]));
}

#[tokio::test]
async fn tracking_snapshot_for_unknown_delivery_returns_404() {
    let (app, _rx) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/deliveries/{fake_id}/tracking")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use pod_shop_api::{app::build_app, models::Role};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use common::{bearer, offline_state};

const BOUNDARY: &str = "pod-shop-boundary";

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_body(filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(path: &str, auth: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    Request::post(path)
        .header(header::AUTHORIZATION, auth)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(filename, bytes)))
        .unwrap()
}

#[tokio::test]
async fn health_is_served_with_request_id() {
    let app = build_app(offline_state());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn readiness_reports_unreachable_database() {
    let app = build_app(offline_state());
    let response = app
        .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["data"]["database"], "down");
}

#[tokio::test]
async fn unknown_route_returns_json_404() {
    let app = build_app(offline_state());
    let response = app
        .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["data"]["path"], "/api/nope");
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = build_app(offline_state());

    let missing = app
        .clone()
        .oneshot(Request::get("/api/cart").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let forged = app
        .oneshot(
            Request::get("/api/orders")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(forged).await;
    assert!(body["data"]["error"].as_str().unwrap().contains("token"));
}

#[tokio::test]
async fn admin_routes_reject_customers() {
    let app = build_app(offline_state());
    let customer = bearer(Uuid::new_v4(), Role::Customer);

    for path in [
        "/api/admin/dashboard/overview",
        "/api/admin/orders",
        "/api/admin/users",
        "/api/coupons",
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::get(path)
                    .header(header::AUTHORIZATION, &customer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
    }
}

#[tokio::test]
async fn docs_are_served() {
    let app = build_app(offline_state());
    let response = app
        .oneshot(Request::get("/docs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn image_upload_round_trips_through_presigned_url() {
    let app = build_app(offline_state());
    let admin = bearer(Uuid::new_v4(), Role::Admin);
    let png = b"\x89PNG\r\n\x1a\nfake";

    let response = app
        .clone()
        .oneshot(upload_request("/api/uploads/images", &admin, "Front Logo.png", png))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    let key = body["data"]["key"].as_str().unwrap();
    assert!(key.starts_with("images/"));
    assert!(key.ends_with("Front-Logo.png"));
    assert_eq!(body["data"]["content_type"], "image/png");

    let url = body["data"]["url"].as_str().unwrap();
    let path = url.strip_prefix("http://localhost:3000").unwrap();
    let download = app
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(download.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], png);
}

#[tokio::test]
async fn uploads_are_checked_before_storing() {
    let app = build_app(offline_state());
    let admin = bearer(Uuid::new_v4(), Role::Admin);
    let customer = bearer(Uuid::new_v4(), Role::Customer);

    let wrong_type = app
        .clone()
        .oneshot(upload_request("/api/uploads/images", &admin, "design.pdf", b"%PDF-1.7"))
        .await
        .unwrap();
    assert_eq!(wrong_type.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let empty = app
        .clone()
        .oneshot(upload_request("/api/uploads/order-files", &customer, "art.pdf", b""))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let not_admin = app
        .oneshot(upload_request("/api/uploads/images", &customer, "logo.png", b"png"))
        .await
        .unwrap();
    assert_eq!(not_admin.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn print_files_land_in_the_uploaders_pending_folder() {
    let app = build_app(offline_state());
    let user_id = Uuid::new_v4();
    let customer = bearer(user_id, Role::Customer);

    let response = app
        .clone()
        .oneshot(upload_request("/api/uploads/order-files", &customer, "artwork.pdf", b"%PDF-1.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let key = body["data"]["key"].as_str().unwrap().to_string();
    assert!(key.starts_with(&format!("orders-file/pending/{user_id}/")));

    let stranger = bearer(Uuid::new_v4(), Role::Customer);
    let response = app
        .oneshot(
            Request::delete(format!("/api/uploads/order-files?key={key}"))
                .header(header::AUTHORIZATION, &stranger)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_download_token_is_unauthorized() {
    let app = build_app(offline_state());
    let response = app
        .oneshot(Request::get("/api/files/garbage").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

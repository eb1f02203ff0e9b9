use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use unitrade_api::storage::ImageStorage;
use unitrade_api::{AppStateInner, router};
use unitrade_db::Database;
use unitrade_gateway::Dispatcher;

const ADMIN_EMAIL: &str = "admin@campus.edu";
const PASSWORD: &str = "correct horse";

struct TestApp {
    router: Router,
    db: Arc<Database>,
    image_dir: PathBuf,
}

impl TestApp {
    async fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let image_dir = std::env::temp_dir().join(format!("unitrade-api-{}", Uuid::new_v4()));
        let storage = ImageStorage::new(image_dir.clone(), "http://localhost:3000").await.unwrap();
        let state = Arc::new(AppStateInner::new(
            db.clone(),
            "integration-test-secret".into(),
            vec![ADMIN_EMAIL.into()],
            storage,
            Dispatcher::new(),
        ));
        Self { router: router(state), db, image_dir }
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    /// Returns `(token, user_id)`.
    async fn sign_up(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .call("POST", "/auth/sign-up", None, Some(json!({ "email": email, "password": PASSWORD })))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (body["token"].as_str().unwrap().to_string(), body["user_id"].as_str().unwrap().to_string())
    }

    async fn create_listing(&self, token: &str, title: &str, price: f64) -> Value {
        let (status, body) = self
            .call("POST", "/listings", Some(token), Some(listing_body(title, price, "image/png", &png())))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    fn stored_images(&self) -> usize {
        std::fs::read_dir(&self.image_dir).map(|d| d.count()).unwrap_or(0)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.image_dir);
    }
}

fn png() -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&Uuid::new_v4().into_bytes());
    bytes
}

fn listing_body(title: &str, price: f64, content_type: &str, image: &[u8]) -> Value {
    json!({
        "title": title,
        "description": "Barely used",
        "price": price,
        "category": "Books",
        "condition": "used",
        "image": { "content_type": content_type, "data": B64.encode(image) },
    })
}

fn purchase_form() -> Value {
    json!({
        "buyerMessage": "Is it still available?",
        "contactInfo": "050 123 4567",
        "pickupTime": "2024-03-21T16:00",
        "pickupLocation": "d2",
        "paymentMethod": "cash",
    })
}

#[tokio::test]
async fn sign_up_login_and_session() {
    let app = TestApp::new().await;
    let (_, user_id) = app.sign_up("alice@campus.edu").await;

    let (status, _) = app
        .call("POST", "/auth/sign-up", None, Some(json!({ "email": "alice@campus.edu", "password": PASSWORD })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .call("POST", "/auth/sign-up", None, Some(json!({ "email": "nope", "password": "short" })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["email"].is_string());
    assert!(body["errors"]["password"].is_string());

    let (status, body) = app
        .call("POST", "/auth/login", None, Some(json!({ "email": "alice@campus.edu", "password": "wrong password" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, Value::Null);

    let (status, body) = app
        .call("POST", "/auth/login", None, Some(json!({ "email": "alice@campus.edu", "password": PASSWORD })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "user");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.call("GET", "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], user_id);
    assert_eq!(body["email"], "alice@campus.edu");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = TestApp::new().await;

    let (status, _) = app.call("GET", "/listings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.call("GET", "/chats", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gate_redirects_by_session() {
    let app = TestApp::new().await;
    let (token, _) = app.sign_up("alice@campus.edu").await;

    let (_, body) = app.call("GET", "/auth/gate?path=/chats", None, None).await;
    assert_eq!(body["decision"]["decision"], "redirect");
    assert_eq!(body["decision"]["location"], "/auth/login");

    let (_, body) = app.call("GET", "/auth/gate?path=/auth/login", Some(&token), None).await;
    assert_eq!(body["decision"]["location"], "/listings");

    let (_, body) = app.call("GET", "/auth/gate?path=/chats", Some(&token), None).await;
    assert_eq!(body["decision"]["decision"], "allow");
}

#[tokio::test]
async fn create_and_search_listings() {
    let app = TestApp::new().await;
    let (token, user_id) = app.sign_up("seller@campus.edu").await;

    let listing = app.create_listing(&token, "Calculus textbook", 40.0).await;
    assert_eq!(listing["seller_id"], user_id);
    assert_eq!(listing["status"], "active");
    assert!(listing["image_url"].as_str().unwrap().starts_with("http://localhost:3000/images/"));
    app.create_listing(&token, "Desk lamp", 15.0).await;
    assert_eq!(app.stored_images(), 2);

    let (status, body) = app.call("GET", "/listings?q=CALCULUS", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_results"], 1);
    assert_eq!(body["listings"][0]["title"], "Calculus textbook");

    let (_, body) = app.call("GET", "/listings?sortBy=priceAsc&maxPrice=40", Some(&token), None).await;
    let titles: Vec<_> = body["listings"].as_array().unwrap().iter().map(|l| l["title"].clone()).collect();
    assert_eq!(titles, vec![json!("Desk lamp"), json!("Calculus textbook")]);

    let (status, _) = app.call("GET", "/listings?minPrice=cheap", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.call("GET", "/dashboard/listings", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_listing_stores_nothing() {
    let app = TestApp::new().await;
    let (token, _) = app.sign_up("seller@campus.edu").await;

    let (status, body) = app
        .call("POST", "/listings", Some(&token), Some(listing_body("ab", 0.0, "image/png", &png())))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["title"].is_string());
    assert!(body["errors"]["price"].is_string());

    let (status, body) = app
        .call("POST", "/listings", Some(&token), Some(listing_body("Lamp", 10.0, "image/gif", b"GIF89a")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["image"].is_string());

    assert_eq!(app.stored_images(), 0);
    let (_, body) = app.call("GET", "/listings", Some(&token), None).await;
    assert_eq!(body["total_results"], 0);
}

#[tokio::test]
async fn purchase_request_renders_a_chat_draft() {
    let app = TestApp::new().await;
    let (seller, _) = app.sign_up("seller@campus.edu").await;
    let (buyer, _) = app.sign_up("buyer@campus.edu").await;
    let listing = app.create_listing(&seller, "Mini fridge", 120.0).await;
    let listing_id = listing["id"].as_str().unwrap();
    let uri = format!("/listings/{listing_id}/purchase-request");

    let (status, body) = app.call("POST", &uri, Some(&buyer), Some(json!({ "buyerMessage": "hi" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"].as_object().unwrap().len(), 4);

    let (status, _) = app.call("POST", &uri, Some(&seller), Some(purchase_form())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.call("POST", &uri, Some(&buyer), Some(purchase_form())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room"], listing_id);
    let draft = body["draft"].as_str().unwrap();
    assert!(draft.contains("Mini fridge"));
    assert!(draft.contains("buyer@campus.edu"));
    assert!(draft.contains("D2 Dining Hall"));
    assert!(body["redirect"].as_str().unwrap().starts_with(&format!("/chats?room={listing_id}&message=")));

    let sold = format!("/dashboard/listings/{listing_id}/sold");
    let (status, body) = app.call("POST", &sold, Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sold");

    let (status, _) = app.call("POST", &uri, Some(&buyer), Some(purchase_form())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn chats_are_private_to_participants() {
    let app = TestApp::new().await;
    let (seller, _) = app.sign_up("seller@campus.edu").await;
    let (buyer, _) = app.sign_up("buyer@campus.edu").await;
    let (outsider, _) = app.sign_up("outsider@campus.edu").await;
    let listing = app.create_listing(&seller, "Bike", 200.0).await;
    let listing_id = listing["id"].as_str().unwrap();

    let (status, _) = app.call("POST", "/chats", Some(&seller), Some(json!({ "listing_id": listing_id }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, chat) = app.call("POST", "/chats", Some(&buyer), Some(json!({ "listing_id": listing_id }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let chat_id = chat["id"].as_str().unwrap().to_string();

    let (status, again) = app.call("POST", "/chats", Some(&buyer), Some(json!({ "listing_id": listing_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], chat_id);

    let messages = format!("/chats/{chat_id}/messages");
    let (status, body) = app.call("POST", &messages, Some(&buyer), Some(json!({ "content": "Still for sale?" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"]["content"], "Still for sale?");

    let (status, body) = app.call("POST", &messages, Some(&buyer), Some(json!({ "content": "   " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["content"].is_string());

    for (uri, method) in [(format!("/chats/{chat_id}"), "GET"), (messages.clone(), "GET")] {
        let (status, _) = app.call(method, &uri, Some(&outsider), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, _) = app.call("POST", &messages, Some(&outsider), Some(json!({ "content": "hello" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.call("GET", "/chats/unread-count", Some(&seller), None).await;
    assert_eq!(body["count"], 1);

    let read = format!("/chats/{chat_id}/read");
    let (_, body) = app.call("POST", &read, Some(&seller), None).await;
    assert_eq!(body["updated"], 1);
    let (_, body) = app.call("GET", "/chats/unread-count", Some(&seller), None).await;
    assert_eq!(body["count"], 0);

    let (_, body) = app.call("GET", "/chats", Some(&seller), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn moderation_console() {
    let app = TestApp::new().await;
    let (admin, admin_id) = app.sign_up(ADMIN_EMAIL).await;
    let (seller, seller_id) = app.sign_up("seller@campus.edu").await;
    let (buyer, _) = app.sign_up("buyer@campus.edu").await;
    let listing = app.create_listing(&seller, "Suspicious item", 5.0).await;
    let listing_id = listing["id"].as_str().unwrap();

    let (status, _) = app.call("GET", "/admin/flagged-listings", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let report = format!("/listings/{listing_id}/report");
    let (status, _) = app.call("POST", &report, Some(&seller), Some(json!({ "reason": "mine" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call("POST", &report, Some(&buyer), Some(json!({ "reason": "Looks fake" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.call("GET", "/admin/flagged-listings", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], listing_id);
    assert_eq!(body[0]["reason"], "Looks fake");

    let (status, body) = app.call("POST", &format!("/admin/listings/{listing_id}/ban"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "banned");

    let (_, body) = app.call("GET", "/listings", Some(&buyer), None).await;
    assert_eq!(body["total_results"], 0);
    let (status, _) = app.call("GET", &format!("/listings/{listing_id}"), Some(&buyer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.call("GET", &format!("/listings/{listing_id}"), Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.call("POST", &format!("/admin/listings/{listing_id}/unban"), Some(&admin), None).await;
    assert_eq!(body["status"], "active");

    let (status, _) = app.call("POST", &format!("/admin/users/{admin_id}/ban"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.call("POST", &format!("/admin/users/{}/ban", Uuid::new_v4()), Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.call("POST", &format!("/admin/users/{seller_id}/ban"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["banned"], true);

    let (status, _) = app
        .call("POST", "/listings", Some(&seller), Some(listing_body("Another one", 9.0, "image/png", &png())))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.call("GET", "/admin/users", Some(&admin), None).await;
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = app.call("GET", "/admin/migration", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn failed_listing_write_removes_the_new_image() {
    let app = TestApp::new().await;
    let (seller, _) = app.sign_up("seller@campus.edu").await;
    app.db
        .with_conn_mut(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_listings BEFORE INSERT ON listings
                 BEGIN SELECT RAISE(ABORT, 'listings are read-only'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    let (status, body) = app
        .call("POST", "/listings", Some(&seller), Some(listing_body("Desk lamp", 12.0, "image/png", &png())))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("listings are read-only"), "{body}");
    assert_eq!(app.stored_images(), 0);

    let (_, body) = app.call("GET", "/dashboard/listings", Some(&seller), None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn oversized_listing_is_rejected_with_an_error_body() {
    let app = TestApp::new().await;
    let (seller, _) = app.sign_up("seller@campus.edu").await;
    let huge = vec![b'x'; 9 * 1024 * 1024];

    let (status, body) = app
        .call("POST", "/listings", Some(&seller), Some(listing_body("Big poster", 5.0, "image/png", &huge)))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload too large");
    assert_eq!(app.stored_images(), 0);
}

#[tokio::test]
async fn removed_listings_leave_search_and_the_flagged_view() {
    let app = TestApp::new().await;
    let (admin, _) = app.sign_up(ADMIN_EMAIL).await;
    let (seller, _) = app.sign_up("seller@campus.edu").await;
    let (buyer, _) = app.sign_up("buyer@campus.edu").await;
    let by_admin = app.create_listing(&seller, "Counterfeit jersey", 30.0).await;
    let by_seller = app.create_listing(&seller, "Old printer", 15.0).await;
    let by_admin = by_admin["id"].as_str().unwrap();
    let by_seller = by_seller["id"].as_str().unwrap();

    for id in [by_admin, by_seller] {
        let report = format!("/listings/{id}/report");
        let (status, _) = app.call("POST", &report, Some(&buyer), Some(json!({ "reason": "Suspicious" }))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (_, body) = app.call("GET", "/admin/flagged-listings", Some(&admin), None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let admin_delete = format!("/admin/listings/{by_admin}");
    let (status, _) = app.call("DELETE", &admin_delete, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call("DELETE", &admin_delete, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call("DELETE", &admin_delete, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let seller_delete = format!("/dashboard/listings/{by_seller}");
    let (status, _) = app.call("DELETE", &seller_delete, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.call("DELETE", &seller_delete, Some(&seller), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.call("GET", "/listings", Some(&buyer), None).await;
    assert_eq!(body["total_results"], 0);
    let (_, body) = app.call("GET", "/admin/flagged-listings", Some(&admin), None).await;
    assert!(body.as_array().unwrap().is_empty());
    let (_, body) = app.call("GET", "/dashboard/listings", Some(&seller), None).await;
    assert!(body.as_array().unwrap().is_empty());
    let (status, _) = app.call("GET", &format!("/listings/{by_seller}"), Some(&seller), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

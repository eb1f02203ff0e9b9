//! Typed wrapper around the REST API.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use unitrade_types::api::{
    CreateChatRequest, CreateListingRequest, ErrorBody, ListingsResponse, LoginRequest,
    LoginResponse, MarkReadResponse, MigrationStatus, ModerationAck, ProductDetails,
    PurchaseRequestResponse, ReportRequest, SendMessageRequest, SendMessageResponse, SessionUser,
    SignUpRequest, SignUpResponse, UnreadCountResponse, UserModerationAck, ValidationErrorBody,
};
use unitrade_types::filters::ListingFilters;
use unitrade_types::models::{Chat, ChatMessage, FlagEntry, FlaggedListing, Listing, UserProfile};
use unitrade_types::purchase::PurchaseForm;

use crate::error::{ClientError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct UnitradeClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl UnitradeClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("bad API URL {:?}: {}", base_url, e)))?;
        // Keep any path prefix when joining endpoints onto it.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base_url: url, token: None })
    }

    /// Reads `UNITRADE_API_URL` and the optional `UNITRADE_API_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("UNITRADE_API_URL")
            .map_err(|_| ClientError::Config("UNITRADE_API_URL is not set".into()))?;
        let client = Self::new(&url)?;
        Ok(match std::env::var("UNITRADE_API_TOKEN") {
            Ok(token) if !token.trim().is_empty() => client.with_token(token.trim()),
            _ => client,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Config(format!("bad endpoint {:?}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!("{} {}", method, url);
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        read_json(self.request(Method::GET, url).send().await?).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.endpoint(path)?;
        read_json(self.request(Method::POST, url).json(body).send().await?).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        read_json(self.request(Method::POST, url).send().await?).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.endpoint(path)?;
        check(self.request(Method::DELETE, url).send().await?).await?;
        Ok(())
    }

    // -- Auth --

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
        let body = SignUpRequest { email: email.into(), password: password.into() };
        self.post("auth/sign-up", &body).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest { email: email.into(), password: password.into() };
        self.post("auth/login", &body).await
    }

    pub async fn session(&self) -> Result<SessionUser> {
        self.get("auth/session").await
    }

    // -- Listings --

    pub async fn search_listings(&self, filters: &ListingFilters) -> Result<ListingsResponse> {
        let mut url = self.endpoint("listings")?;
        let pairs = filters.to_query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        read_json(self.request(Method::GET, url).send().await?).await
    }

    pub async fn get_listing(&self, id: Uuid) -> Result<ProductDetails> {
        self.get(&format!("listings/{}", id)).await
    }

    pub async fn create_listing(&self, req: &CreateListingRequest) -> Result<Listing> {
        self.post("listings", req).await
    }

    pub async fn my_listings(&self) -> Result<Vec<Listing>> {
        self.get("dashboard/listings").await
    }

    pub async fn mark_sold(&self, id: Uuid) -> Result<ModerationAck> {
        self.post_empty(&format!("dashboard/listings/{}/sold", id)).await
    }

    pub async fn delete_listing(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("dashboard/listings/{}", id)).await
    }

    pub async fn purchase_request(&self, id: Uuid, form: &PurchaseForm) -> Result<PurchaseRequestResponse> {
        self.post(&format!("listings/{}/purchase-request", id), form).await
    }

    pub async fn report_listing(&self, id: Uuid, reason: &str) -> Result<FlagEntry> {
        let body = ReportRequest { reason: reason.into() };
        self.post(&format!("listings/{}/report", id), &body).await
    }

    // -- Chats --

    pub async fn chats(&self) -> Result<Vec<Chat>> {
        self.get("chats").await
    }

    pub async fn create_chat(&self, listing_id: Uuid) -> Result<Chat> {
        self.post("chats", &CreateChatRequest { listing_id }).await
    }

    pub async fn chat_messages(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.get(&format!("chats/{}/messages", chat_id)).await
    }

    pub async fn send_message(
        &self,
        chat_id: Uuid,
        content: &str,
        purchase_request_id: Option<String>,
    ) -> Result<SendMessageResponse> {
        let body = SendMessageRequest { content: content.into(), purchase_request_id };
        self.post(&format!("chats/{}/messages", chat_id), &body).await
    }

    pub async fn mark_read(&self, chat_id: Uuid) -> Result<MarkReadResponse> {
        self.post_empty(&format!("chats/{}/read", chat_id)).await
    }

    pub async fn unread_count(&self) -> Result<u64> {
        let resp: UnreadCountResponse = self.get("chats/unread-count").await?;
        Ok(resp.count)
    }

    // -- Admin --

    pub async fn flagged_listings(&self) -> Result<Vec<FlaggedListing>> {
        self.get("admin/flagged-listings").await
    }

    pub async fn ban_listing(&self, id: Uuid) -> Result<ModerationAck> {
        self.post_empty(&format!("admin/listings/{}/ban", id)).await
    }

    pub async fn unban_listing(&self, id: Uuid) -> Result<ModerationAck> {
        self.post_empty(&format!("admin/listings/{}/unban", id)).await
    }

    pub async fn remove_listing(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("admin/listings/{}", id)).await
    }

    pub async fn users(&self) -> Result<Vec<UserProfile>> {
        self.get("admin/users").await
    }

    pub async fn ban_user(&self, id: Uuid) -> Result<UserModerationAck> {
        self.post_empty(&format!("admin/users/{}/ban", id)).await
    }

    pub async fn unban_user(&self, id: Uuid) -> Result<UserModerationAck> {
        self.post_empty(&format!("admin/users/{}/unban", id)).await
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        self.get("admin/migration").await
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    Ok(check(resp).await?.json().await?)
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

/// Turns an error response into the message the server meant to show.
pub(crate) fn error_from_body(status: StatusCode, body: &str) -> ClientError {
    if let Ok(ValidationErrorBody { errors }) = serde_json::from_str(body) {
        return ClientError::Validation(errors);
    }
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status.canonical_reason().unwrap_or("Request failed").to_string(),
    };
    ClientError::Status { status: status.as_u16(), message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_the_base_path() {
        let client = UnitradeClient::new("https://market.example/api").unwrap();
        assert_eq!(client.endpoint("/listings").unwrap().as_str(), "https://market.example/api/listings");
        assert_eq!(
            client.endpoint("chats/unread-count").unwrap().as_str(),
            "https://market.example/api/chats/unread-count"
        );
    }

    #[test]
    fn rejects_a_bad_base_url() {
        assert!(matches!(UnitradeClient::new("not a url"), Err(ClientError::Config(_))));
    }

    #[test]
    fn error_bodies_carry_the_server_message() {
        let err = error_from_body(StatusCode::CONFLICT, r#"{"error":"You cannot buy your own listing"}"#);
        assert!(matches!(err, ClientError::Status { status: 409, .. }));
        assert_eq!(err.to_string(), "You cannot buy your own listing");

        let err = error_from_body(StatusCode::UNPROCESSABLE_ENTITY, r#"{"errors":{"title":"Too short"}}"#);
        match err {
            ClientError::Validation(errors) => assert_eq!(errors["title"], "Too short"),
            other => panic!("unexpected {other:?}"),
        }

        let err = error_from_body(StatusCode::NOT_FOUND, "");
        assert_eq!(err.to_string(), "Not Found");
    }
}

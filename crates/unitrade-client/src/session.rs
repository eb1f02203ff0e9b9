//! Process-wide session state.
//!
//! [`SessionContext`] is owned by the auth flow and is the only thing that
//! changes the session. Everything else holds a [`SessionReader`].

use tokio::sync::watch;
use tracing::info;

use unitrade_types::api::SessionUser;
use unitrade_types::gate::{GateDecision, route_gate};
use unitrade_types::models::Role;

use crate::error::{ClientError, Result};
use crate::http::UnitradeClient;

pub struct SessionContext {
    tx: watch::Sender<Option<SessionUser>>,
}

#[derive(Clone)]
pub struct SessionReader {
    rx: watch::Receiver<Option<SessionUser>>,
}

impl SessionContext {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader { rx: self.tx.subscribe() }
    }

    /// Restores the session on load from whatever token the client holds. A
    /// rejected token clears it and leaves the session signed out.
    pub async fn init(&self, client: &mut UnitradeClient) -> Result<Option<SessionUser>> {
        if client.token().is_none() {
            self.tx.send_replace(None);
            return Ok(None);
        }
        let user = match client.session().await {
            Ok(user) => Some(user),
            Err(ClientError::Unauthorized) => {
                client.set_token(None);
                None
            }
            Err(e) => return Err(e),
        };
        self.tx.send_replace(user.clone());
        Ok(user)
    }

    pub async fn sign_in(&self, client: &mut UnitradeClient, email: &str, password: &str) -> Result<SessionUser> {
        let resp = client.login(email, password).await?;
        client.set_token(Some(resp.token));
        let user = SessionUser { id: resp.user_id, email: resp.email, role: resp.role };
        info!("Signed in as {}", user.email);
        self.tx.send_replace(Some(user.clone()));
        Ok(user)
    }

    /// Drops the token and tells every reader the session ended.
    pub fn sign_out(&self, client: &mut UnitradeClient) {
        client.set_token(None);
        if let Some(user) = self.tx.send_replace(None) {
            info!("Signed out {}", user.email);
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReader {
    pub fn current(&self) -> Option<SessionUser> {
        self.rx.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.rx
            .borrow()
            .as_ref()
            .is_some_and(|u| u.role == Role::Admin)
    }

    /// Where a navigation to `path` should land right now.
    pub fn gate(&self, path: &str) -> GateDecision {
        route_gate(path, self.is_signed_in())
    }

    /// Waits for the next sign-in or sign-out. Fails once the context is
    /// gone.
    pub async fn changed(&mut self) -> Result<Option<SessionUser>> {
        self.rx.changed().await.map_err(|_| ClientError::Cancelled)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

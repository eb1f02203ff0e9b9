use serde::Serialize;

pub const LOGIN_PATH: &str = "/auth/login";
pub const HOME_PATH: &str = "/listings";

const PROTECTED_PREFIXES: [&str; 6] = [
    "/listings",
    "/messages",
    "/chats",
    "/mydashboard",
    "/admin",
    "/protected",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "location", rename_all = "lowercase")]
pub enum GateDecision {
    Allow,
    Redirect(&'static str),
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
}

pub fn is_protected(path: &str) -> bool {
    PROTECTED_PREFIXES.iter().any(|p| under(path, p))
}

/// Decide what a request for `path` should do given whether a session exists.
/// Signed-out users are sent to login from protected pages; signed-in users
/// are sent to the catalog from the auth pages.
pub fn route_gate(path: &str, has_session: bool) -> GateDecision {
    if !has_session && is_protected(path) {
        return GateDecision::Redirect(LOGIN_PATH);
    }
    if has_session && under(path, "/auth") {
        return GateDecision::Redirect(HOME_PATH);
    }
    GateDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_out_users_go_to_login() {
        for path in ["/listings", "/listings/42", "/chats?room=x", "/admin/flaggedListings", "/mydashboard"] {
            assert_eq!(route_gate(path, false), GateDecision::Redirect(LOGIN_PATH), "{path}");
        }
        assert_eq!(route_gate("/", false), GateDecision::Allow);
        assert_eq!(route_gate("/auth/login", false), GateDecision::Allow);
        assert_eq!(route_gate("/listingsale", false), GateDecision::Allow);
    }

    #[test]
    fn signed_in_users_skip_auth_pages() {
        assert_eq!(route_gate("/auth/login", true), GateDecision::Redirect(HOME_PATH));
        assert_eq!(route_gate("/auth/sign-up", true), GateDecision::Redirect(HOME_PATH));
        assert_eq!(route_gate("/", true), GateDecision::Allow);
        assert_eq!(route_gate("/messages/7", true), GateDecision::Allow);
    }
}

use serde::{Deserialize, Serialize};

/// What the session cookie carries. A login state and a session identifier
/// never share one cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CookiePayload {
    PendingLogin { state: String },
    Authenticated { session_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    PendingLogin,
    Authenticated,
    Terminated,
}

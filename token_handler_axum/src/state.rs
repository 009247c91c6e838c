use std::sync::Arc;

use token_handler::SessionManager;

/// Shared state of the token-handler routes and [`crate::require_session`].
#[derive(Clone)]
pub struct TokenHandlerState {
    pub(crate) manager: SessionManager,
    pub(crate) post_login_redirect: Arc<str>,
    pub(crate) post_logout_redirect: Arc<str>,
}

impl TokenHandlerState {
    /// `post_logout_redirect` is also sent to the provider as
    /// `post_logout_redirect_uri`, so it should be absolute.
    pub fn new(
        manager: SessionManager,
        post_login_redirect: impl Into<Arc<str>>,
        post_logout_redirect: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            manager,
            post_login_redirect: post_login_redirect.into(),
            post_logout_redirect: post_logout_redirect.into(),
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }
}

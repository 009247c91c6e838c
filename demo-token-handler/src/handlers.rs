use axum::response::Html;
use token_handler_axum::{AUTH_ROUTE_PREFIX, AccessToken};

pub(crate) async fn index() -> Html<String> {
    let prefix = AUTH_ROUTE_PREFIX.as_str();
    Html(format!(
        r#"<!doctype html>
<html>
  <body>
    <h1>Token handler demo</h1>
    <p><a href="{prefix}/login">Log in</a></p>
    <p><a href="/protected">Protected page</a></p>
  </body>
</html>"#
    ))
}

pub(crate) async fn protected(token: AccessToken) -> Html<String> {
    tracing::trace!(token_len = token.as_str().len(), "Serving protected page");
    let prefix = AUTH_ROUTE_PREFIX.as_str();
    Html(format!(
        r#"<!doctype html>
<html>
  <body>
    <h1>Logged in</h1>
    <p>The access token stays on the server.</p>
    <p><a href="{prefix}/userinfo">User info</a></p>
    <p><a href="{prefix}/logout">Log out</a></p>
  </body>
</html>"#
    ))
}

use std::sync::LazyLock;

/// Mount point of [`crate::auth_router`].
/// Default: "/auth"
pub static AUTH_ROUTE_PREFIX: LazyLock<String> =
    LazyLock::new(|| route_prefix(std::env::var("AUTH_ROUTE_PREFIX").ok().as_deref()));

fn route_prefix(env_value: Option<&str>) -> String {
    match env_value.map(|v| v.trim().trim_end_matches('/')) {
        Some(v) if !v.is_empty() => {
            if v.starts_with('/') {
                v.to_string()
            } else {
                format!("/{v}")
            }
        }
        _ => "/auth".to_string(),
    }
}

use std::str::FromStr;

/// Read `key` and parse it, falling back to `default` when unset or malformed.
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    parse_env_optional(key).unwrap_or(default)
}

/// Read `key` and parse it; `None` when unset or malformed.
pub fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

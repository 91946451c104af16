fn parse_env_bool(var: &str) -> Option<bool> {
    std::env::var(var).ok().and_then(|value| parse_bool(&value))
}

fn parse_bool(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" | "enable" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn api_base_url() -> Option<String> {
    non_empty_env("CATALOG_SYNC_API_URL")
}

pub fn client_id() -> Option<String> {
    non_empty_env("CATALOG_SYNC_CLIENT_ID")
}

/// Keep filter state in memory only.
pub fn ephemeral_filters() -> bool {
    parse_env_bool("CATALOG_SYNC_EPHEMERAL").unwrap_or(false)
}

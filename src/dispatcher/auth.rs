//! Credential extraction from an inbound request.

use axum::http::HeaderMap;

pub enum Credential {
    /// A gateway-issued `gapi-` key, resolved against `ExclusiveKey`.
    Exclusive(String),
    /// Any other key, forwarded upstream unchanged with no owning user.
    Passthrough(String),
}

/// Extracts the caller's credential from `Authorization: Bearer`, `x-api-key`,
/// `x-goog-api-key`, or a `key` query parameter, in that precedence order.
pub fn extract_credential(headers: &HeaderMap, query: &str) -> Option<Credential> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string))
        .or_else(|| headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()).map(str::to_string))
        .or_else(|| query_param(query, "key"))?;

    if raw.starts_with("gapi-") {
        Some(Credential::Exclusive(raw))
    } else {
        Some(Credential::Passthrough(raw))
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_preferred_and_classified_by_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer gapi-abc123".parse().unwrap());
        match extract_credential(&headers, "").unwrap() {
            Credential::Exclusive(k) => assert_eq!(k, "gapi-abc123"),
            _ => panic!("expected exclusive credential"),
        }
    }

    #[test]
    fn non_gapi_key_is_passthrough() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer sk-abc".parse().unwrap());
        match extract_credential(&headers, "").unwrap() {
            Credential::Passthrough(k) => assert_eq!(k, "sk-abc"),
            _ => panic!("expected passthrough credential"),
        }
    }

    #[test]
    fn falls_back_to_query_key_param() {
        let headers = HeaderMap::new();
        match extract_credential(&headers, "model=x&key=AIzaabc").unwrap() {
            Credential::Passthrough(k) => assert_eq!(k, "AIzaabc"),
            _ => panic!("expected passthrough credential"),
        }
    }
}

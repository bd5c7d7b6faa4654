//! Authentication utilities for API requests

/// Add the `Authorization: Bearer` credential used by OpenAI-compatible
/// providers to an HTTP request.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    api_key: &str,
) -> reqwest::RequestBuilder {
    request.header("Authorization", format!("Bearer {api_key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_set() {
        let client = reqwest::Client::new();
        let request = add_auth_headers(client.post("https://example.com/chat"), "secret")
            .build()
            .expect("request should build");
        assert_eq!(
            request.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer secret")
        );
    }
}

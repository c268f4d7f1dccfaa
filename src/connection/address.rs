use url::Url;

use super::ConnectionMode;
use crate::error::ConnectionError;

/// Derive the websocket address for one session
///
/// `http://host:8000` becomes `ws://host:8000/ws/<session>?is_audio=<bool>`;
/// `https` maps to `wss`. Any path prefix on the base address is kept.
pub fn session_url(
    base_url: &str,
    session_id: &str,
    mode: ConnectionMode,
) -> Result<Url, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason,
    };

    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch scheme to {}", scheme)))?;

    if session_id.is_empty() {
        return Err(invalid("empty session id".to_string()));
    }

    url.path_segments_mut()
        .map_err(|_| invalid("base URL cannot carry a path".to_string()))?
        .pop_if_empty()
        .push("ws")
        .push(session_id);

    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("is_audio", if mode.is_audio() { "true" } else { "false" });
    url.set_fragment(None);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_base_becomes_ws() {
        let url = session_url("http://localhost:8000", "abc", ConnectionMode::Audio).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/abc?is_audio=true");
    }

    #[test]
    fn secure_base_becomes_wss() {
        let url = session_url("https://agent.example.com/", "abc", ConnectionMode::Text).unwrap();
        assert_eq!(url.as_str(), "wss://agent.example.com/ws/abc?is_audio=false");
    }

    #[test]
    fn keeps_path_prefix() {
        let url = session_url("https://example.com/api/", "s1", ConnectionMode::Text).unwrap();
        assert_eq!(url.path(), "/api/ws/s1");
    }

    #[test]
    fn session_id_is_escaped() {
        let url = session_url("http://localhost:8000", "a b/c", ConnectionMode::Text).unwrap();
        assert_eq!(url.path(), "/ws/a%20b%2Fc");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(session_url("ftp://localhost", "abc", ConnectionMode::Text).is_err());
        assert!(session_url("not a url", "abc", ConnectionMode::Text).is_err());
        assert!(session_url("http://localhost", "", ConnectionMode::Text).is_err());
    }
}

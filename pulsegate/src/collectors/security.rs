use crate::types::SecurityScore;
use reqwest::header::HeaderMap;

/// Response headers a hardened backend is expected to send on `/health`.
pub const REQUIRED_HEADERS: &[&str] = &[
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
    "x-content-type-options",
    "referrer-policy",
    "permissions-policy",
];

pub fn score_headers(headers: &HeaderMap) -> SecurityScore {
    let present = REQUIRED_HEADERS
        .iter()
        .filter(|name| headers.contains_key(**name))
        .count() as u32;
    let required = REQUIRED_HEADERS.len() as u32;

    SecurityScore {
        score: present as f64 * 100.0 / required as f64,
        required,
        present,
    }
}

/// Used until `/health` has answered once: nothing verified yet.
pub fn unverified() -> SecurityScore {
    SecurityScore {
        score: 0.0,
        required: REQUIRED_HEADERS.len() as u32,
        present: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn counts_present_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("strict-transport-security", HeaderValue::from_static("max-age=63072000"));
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
        headers.insert("server", HeaderValue::from_static("uvicorn"));

        let score = score_headers(&headers);
        assert_eq!(score.present, 3);
        assert_eq!(score.required, 6);
        assert_eq!(score.score, 50.0);
    }

    #[test]
    fn no_headers_scores_zero() {
        assert_eq!(score_headers(&HeaderMap::new()), unverified());
    }
}

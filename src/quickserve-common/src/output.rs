use serde_json::Value;

/// Host-friendly export of a handler's return value.
///
/// The variants mirror the response interpretation priority: `Empty` maps to
/// 204, `Structured` is unpacked field by field, `Bytes` and `Text` are
/// written raw, and anything else is JSON-encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutput {
    /// `undefined` or `null`.
    Empty,
    /// A `Uint8Array` or `ArrayBuffer`.
    Bytes(Vec<u8>),
    /// A plain string.
    Text(String),
    /// Any other JSON-representable value.
    Json(Value),
    /// A mapping carrying at least one structured-response field.
    Structured(StructuredResponse),
}

/// Body of a structured response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Raw bytes, written as-is.
    Bytes(Vec<u8>),
    /// A string, written as UTF-8.
    Text(String),
    /// Anything else, JSON-encoded on the way out.
    Json(Value),
}

/// A response object returned from a handler, i.e. a mapping containing any
/// of `{status, headers, body, contentType, cookies, redirect}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredResponse {
    /// Explicit status code.
    pub status: Option<u16>,
    /// Header entries with string values.
    pub headers: Vec<(String, String)>,
    /// Response body, when present.
    pub body: Option<ResponseBody>,
    /// Explicit content type; defaults to `application/json` otherwise.
    pub content_type: Option<String>,
    /// Cookies to set on the response.
    pub cookies: Vec<CookieSpec>,
    /// Redirect target; when set, the body is dropped.
    pub redirect: Option<String>,
}

/// One cookie from a structured response's `cookies` sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieSpec {
    /// Cookie name, required non-empty.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Optional `Path` attribute.
    pub path: Option<String>,
    /// Optional `Domain` attribute.
    pub domain: Option<String>,
    /// Optional `Max-Age` in seconds.
    pub max_age: Option<i64>,
    /// `Secure` attribute.
    pub secure: bool,
    /// `HttpOnly` attribute.
    pub http_only: bool,
    /// Optional `SameSite` attribute.
    pub same_site: Option<SameSite>,
}

/// `SameSite` cookie attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

impl SameSite {
    /// Parse the attribute case-insensitively; unknown values are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

/// Field names whose presence makes a returned mapping a structured response.
pub const STRUCTURED_FIELDS: [&str; 6] = [
    "status",
    "headers",
    "body",
    "contentType",
    "cookies",
    "redirect",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_parses_case_insensitively() {
        assert_eq!(SameSite::parse("Strict"), Some(SameSite::Strict));
        assert_eq!(SameSite::parse("LAX"), Some(SameSite::Lax));
        assert_eq!(SameSite::parse("none"), Some(SameSite::None));
        assert_eq!(SameSite::parse("other"), None);
    }
}

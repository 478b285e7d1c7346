use serde_json::{Map, Value};

use crate::registry::PathParams;

/// The request value handed to a JS handler.
///
/// `query` and `headers` values are either a string (single-valued) or an
/// array of strings (multi-valued); `cookies` values are plain strings.
#[derive(Debug, Clone, Default)]
pub struct ScriptRequest {
    /// HTTP method, upper case.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Request path.
    pub path: String,
    /// Request body decoded as text, empty when absent.
    pub body: String,
    /// Query parameters.
    pub query: Map<String, Value>,
    /// Request headers, canonical-cased names.
    pub headers: Map<String, Value>,
    /// Request cookies.
    pub cookies: Map<String, Value>,
    /// Client address, honoring forwarding headers.
    pub remote_ip: String,
    /// Path parameters extracted from a `:name` pattern.
    pub params: PathParams,
}

impl ScriptRequest {
    /// Build the JS-facing object. Every field is exposed twice, under its
    /// canonical name and under a capitalized alias, so handler code written
    /// against either convention works.
    pub fn to_value(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();

        let mut object = Map::new();
        let fields: [(&str, &str, Value); 9] = [
            ("method", "Method", Value::String(self.method.clone())),
            ("url", "URL", Value::String(self.url.clone())),
            ("path", "Path", Value::String(self.path.clone())),
            ("body", "Body", Value::String(self.body.clone())),
            ("query", "Query", Value::Object(self.query.clone())),
            ("headers", "Headers", Value::Object(self.headers.clone())),
            ("cookies", "Cookies", Value::Object(self.cookies.clone())),
            ("remoteIP", "RemoteIP", Value::String(self.remote_ip.clone())),
            ("params", "Params", Value::Object(params)),
        ];
        for (name, alias, value) in fields {
            object.insert(name.to_string(), value.clone());
            object.insert(alias.to_string(), value);
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn value_exposes_both_casings() {
        let request = ScriptRequest {
            method: "GET".into(),
            url: "http://localhost/u/42?x=1".into(),
            path: "/u/42".into(),
            params: vec![("id".into(), "42".into())],
            ..Default::default()
        };

        let value = request.to_value();
        assert_eq!(value["method"], json!("GET"));
        assert_eq!(value["Method"], json!("GET"));
        assert_eq!(value["params"]["id"], json!("42"));
        assert_eq!(value["Params"]["id"], json!("42"));
        assert_eq!(value["body"], json!(""));
    }
}

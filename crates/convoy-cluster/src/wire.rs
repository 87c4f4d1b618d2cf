//! Bodies of the `/discovery` HTTP exchange

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Service path of the discovery endpoint
pub const DISCOVERY_SERVICE: &str = "discovery";

/// Membership view pushed to a peer: `{"nodes": "h1:p1,h2:p2"}`
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: String,
}

impl NodeList {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let nodes = names
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        Self { nodes }
    }

    /// Non-empty, trimmed entries in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Validate a `GET /discovery` body: a JSON object carrying a `time` field
pub fn parse_meta(body: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) if map.contains_key("time") => Ok(map),
        Ok(Value::Object(_)) => Err("missing time field".to_string()),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_list_has_no_leading_blanks() {
        let list = NodeList::from_names(&["a:1", "b:2"]);
        assert_eq!(list.nodes, "a:1,b:2");
        assert_eq!(
            serde_json::to_string(&list).unwrap(),
            r#"{"nodes":"a:1,b:2"}"#
        );
    }

    #[test]
    fn test_names_skip_blank_entries() {
        let list = NodeList {
            nodes: ",,a:1, ,b:2,".to_string(),
        };
        assert_eq!(list.names().collect::<Vec<_>>(), vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_parse_meta() {
        assert!(parse_meta(r#"{"time": 1700000000}"#).is_ok());
        assert!(parse_meta(r#"{"nodes": ""}"#).is_err());
        assert!(parse_meta("[1, 2]").is_err());
        assert!(parse_meta("<html>").is_err());
    }
}

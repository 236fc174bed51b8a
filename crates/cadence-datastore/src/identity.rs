//! Canonical identifier construction and decoding.
//!
//! Store identifiers are delimiter-joined strings:
//!
//! - workflow:      `owner|name`
//! - definition:    `owner|name|namespace`
//! - proxy:         `owner|name|point|namespace`
//! - edge:          `owner|name|source-node|target-node`
//!
//! Graph node references use the separate `name.point` form.

/// Delimiter between identifier segments.
pub const ID_DELIM: char = '|';

/// Delimiter between name and point in a graph node reference.
pub const NODE_DELIM: char = '.';

/// Builds a workflow id from owner and name.
pub fn workflow_id(owner: &str, name: &str) -> String {
    format!("{owner}{ID_DELIM}{name}")
}

/// Builds a task or family definition id.
pub fn def_id(workflow_id: &str, name: &str) -> String {
    format!("{workflow_id}{ID_DELIM}{name}")
}

/// Builds a task or family proxy id.
pub fn proxy_id(workflow_id: &str, point: &str, name: &str) -> String {
    format!("{workflow_id}{ID_DELIM}{point}{ID_DELIM}{name}")
}

/// Builds an edge id from its source and target node references.
pub fn edge_id(workflow_id: &str, source_node: &str, target_node: &str) -> String {
    format!("{workflow_id}{ID_DELIM}{source_node}{ID_DELIM}{target_node}")
}

/// Builds a stamp, the advisory change marker `id@updateTime`.
pub fn stamp(id: &str, update_time: f64) -> String {
    format!("{id}@{update_time}")
}

/// Splits a `name.point` node reference. Returns `None` for nodes
/// missing either part.
pub fn split_node(node: &str) -> Option<(&str, &str)> {
    let (name, point) = node.split_once(NODE_DELIM)?;
    if name.is_empty() || point.is_empty() {
        return None;
    }
    Some((name, point))
}

/// True when a node reference decodes to a plain task name and point.
/// Pseudo-nodes (xtrigger and suite-state references) fail this check and
/// are never materialized as proxies.
pub fn is_valid_node(node: &str) -> bool {
    match split_node(node) {
        Some((name, _)) => name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        None => false,
    }
}

/// Splits a proxy id into its `(point, name)` tail segments.
pub fn proxy_id_parts(id: &str) -> Option<(&str, &str)> {
    let mut segments = id.rsplitn(3, ID_DELIM);
    let name = segments.next()?;
    let point = segments.next()?;
    segments.next()?;
    if name.is_empty() || point.is_empty() {
        return None;
    }
    Some((point, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_construction() {
        let wf = workflow_id("ida", "tides");
        assert_eq!(wf, "ida|tides");
        assert_eq!(def_id(&wf, "ebb"), "ida|tides|ebb");
        assert_eq!(proxy_id(&wf, "1", "ebb"), "ida|tides|1|ebb");
        assert_eq!(edge_id(&wf, "ebb.1", "flow.1"), "ida|tides|ebb.1|flow.1");
    }

    #[test]
    fn test_split_node() {
        assert_eq!(split_node("ebb.20200101T00"), Some(("ebb", "20200101T00")));
        assert_eq!(split_node("ebb"), None);
        assert_eq!(split_node(".1"), None);
        assert!(!is_valid_node("ebb"));
        assert!(is_valid_node("ebb.1"));
        assert!(!is_valid_node("@wall_clock.1"));
    }

    #[test]
    fn test_proxy_id_parts() {
        assert_eq!(proxy_id_parts("ida|tides|1|ebb"), Some(("1", "ebb")));
        assert_eq!(proxy_id_parts("ebb"), None);
    }

    #[test]
    fn test_stamp_format() {
        assert_eq!(stamp("ida|tides", 42.5), "ida|tides@42.5");
    }
}

//! WebSocket topic keys.
//!
//! `module:<id>` carries module lifecycle, container and log events;
//! `container:<moduleID>:<name>` carries tailed container logs; the empty
//! topic broadcasts to every connection.

/// Topic carrying everything about one module.
pub fn module_topic(module_id: &str) -> String {
    format!("module:{module_id}")
}

/// Topic carrying the tailed logs of one container of a module.
pub fn container_topic(module_id: &str, container: &str) -> String {
    format!("container:{module_id}:{container}")
}

/// Parse a `container:<moduleID>:<name>` topic into its parts.
pub fn parse_container_topic(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix("container:")?;
    let (module_id, name) = rest.split_once(':')?;
    if module_id.is_empty() || name.is_empty() {
        return None;
    }
    Some((module_id, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_topic() {
        assert_eq!(module_topic("module_1"), "module:module_1");
    }

    #[test]
    fn test_parse_container_topic_roundtrip() {
        let topic = container_topic("module_1", "backend");
        assert_eq!(parse_container_topic(&topic), Some(("module_1", "backend")));
    }

    #[test]
    fn test_parse_container_topic_rejects_malformed() {
        assert_eq!(parse_container_topic("module:x"), None);
        assert_eq!(parse_container_topic("container:onlyid"), None);
        assert_eq!(parse_container_topic("container::name"), None);
        assert_eq!(parse_container_topic("container:id:"), None);
    }
}

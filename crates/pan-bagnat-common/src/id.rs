//! Kind-prefixed, lexicographically sortable identifiers.
//!
//! Entities get ids of the form `module_0190c8a2...` where the suffix is a
//! UUIDv7 rendered without dashes. UUIDv7 embeds a millisecond timestamp in
//! its most significant bits, so ids of the same kind sort by creation time.

use uuid::Uuid;

pub const KIND_MODULE: &str = "module";
pub const KIND_PAGE: &str = "page";
pub const KIND_SSH_KEY: &str = "sshkey";
pub const KIND_USER: &str = "user";

/// Generate a new id for the given kind, e.g. `module_0190c8a2b3...`.
pub fn new_id(kind: &str) -> String {
    format!("{}_{}", kind, Uuid::now_v7().simple())
}

/// Extract the kind prefix of an id, if any.
pub fn kind_of(id: &str) -> Option<&str> {
    id.split_once('_').map(|(kind, _)| kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_carries_kind_prefix() {
        let id = new_id(KIND_MODULE);
        assert!(id.starts_with("module_"));
        assert_eq!(kind_of(&id), Some("module"));
    }

    #[test]
    fn test_ids_sort_by_creation_order() {
        let a = new_id(KIND_MODULE);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id(KIND_MODULE);
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn test_kind_of_without_prefix() {
        assert_eq!(kind_of("plain"), None);
    }
}

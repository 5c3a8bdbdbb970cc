//! Identifier generation.
//!
//! All persistent entities get a UUIDv4 with a short type prefix so ids
//! are self-describing in logs and on disk.

use uuid::Uuid;

/// Generate a prefixed unique id, e.g. `sess_6f3a…`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

pub fn session_id() -> String {
    new_id("sess")
}

pub fn thread_id() -> String {
    new_id("thr")
}

pub fn episode_id() -> String {
    new_id("ep")
}

pub fn checkpoint_id() -> String {
    new_id("ckpt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_prefix() {
        assert!(session_id().starts_with("sess_"));
        assert!(thread_id().starts_with("thr_"));
        assert!(episode_id().starts_with("ep_"));
        assert!(checkpoint_id().starts_with("ckpt_"));
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| episode_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}

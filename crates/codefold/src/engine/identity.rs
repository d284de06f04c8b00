//! Per-item identities.
//!
//! An identity is `{kind}-{ULID}`: the ULID time part is the session clock
//! (clamped so it never goes backwards) and its 80 random bits keep two
//! items created in the same millisecond apart. Items whose host element
//! carries a durable key get `{kind}-{key}` instead, which is what lets
//! their fold state survive a reload.

use tracing::debug;
use ulid::Ulid;

use super::matcher::ItemKind;
use crate::dom::Dom;

/// Attribute stamped on every identified element.
pub const ID_ATTR: &str = "data-codefold-id";

#[derive(Debug, Default)]
pub struct IdentityAssigner {
    last_ms: u64,
    fallback_counter: u64,
}

impl IdentityAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the identity stamped on `node`, stamping a new one first if
    /// there is none. Calling this again on the same node returns the same
    /// value.
    pub fn ensure_identity<D: Dom>(
        &mut self,
        dom: &mut D,
        node: &D::Node,
        kind: ItemKind,
        host_key: Option<&str>,
        now_ms: u64,
    ) -> String {
        if let Some(existing) = dom.attribute(node, ID_ATTR).filter(|id| !id.is_empty()) {
            return existing;
        }
        let identity = match host_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => format!("{}-{}", kind.prefix(), key),
            None => self.synthesize(kind, now_ms),
        };
        dom.set_attribute(node, ID_ATTR, &identity);
        identity
    }

    /// Fresh session-unique identity.
    pub fn synthesize(&mut self, kind: ItemKind, now_ms: u64) -> String {
        let timestamp_ms = now_ms.max(self.last_ms);
        self.last_ms = timestamp_ms;
        let ulid = Ulid::from_parts(timestamp_ms, self.random_bits(timestamp_ms));
        format!("{}-{}", kind.prefix(), ulid)
    }

    fn random_bits(&mut self, timestamp_ms: u64) -> u128 {
        let mut bytes = [0u8; 10];
        match getrandom::fill(&mut bytes) {
            Ok(()) => bytes
                .iter()
                .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte)),
            Err(error) => {
                // Uniqueness within the session is all that is needed
                debug!(%error, "no OS randomness, using counter suffix");
                self.fallback_counter += 1;
                (u128::from(timestamp_ms) << 32) ^ u128::from(self.fallback_counter)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, ElementSpec};
    use std::collections::HashSet;

    #[test]
    fn ensure_identity_is_idempotent() {
        let mut document = Document::new();
        let body = document.body();
        let node = document.append_spec(body, &ElementSpec::new("pre"));
        let mut assigner = IdentityAssigner::new();

        let first = assigner.ensure_identity(&mut document, &node, ItemKind::Code, None, 1_000);
        let second = assigner.ensure_identity(&mut document, &node, ItemKind::Code, None, 2_000);
        assert_eq!(first, second);
        assert!(first.starts_with("code-"));
        assert_eq!(document.attribute(&node, ID_ATTR).as_deref(), Some(first.as_str()));
    }

    #[test]
    fn host_key_gives_durable_identity() {
        let mut document = Document::new();
        let body = document.body();
        let node = document.append_spec(body, &ElementSpec::new("div"));
        let mut assigner = IdentityAssigner::new();

        let identity =
            assigner.ensure_identity(&mut document, &node, ItemKind::Message, Some("7781"), 0);
        assert_eq!(identity, "msg-7781");
    }

    #[test]
    fn identities_are_unique_within_one_millisecond() {
        let mut assigner = IdentityAssigner::new();
        let identities: HashSet<_> = (0..500)
            .map(|_| assigner.synthesize(ItemKind::Code, 42))
            .collect();
        assert_eq!(identities.len(), 500);
    }

    #[test]
    fn time_component_never_goes_backwards() {
        let mut assigner = IdentityAssigner::new();
        let later = assigner.synthesize(ItemKind::Code, 5_000);
        let earlier_clock = assigner.synthesize(ItemKind::Code, 1_000);

        let time_of = |identity: &str| {
            let ulid: Ulid = identity.trim_start_matches("code-").parse().unwrap();
            ulid.timestamp_ms()
        };
        assert_eq!(time_of(&later), 5_000);
        assert_eq!(time_of(&earlier_clock), 5_000);
    }
}

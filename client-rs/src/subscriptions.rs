//! Channel subscriptions of one transport session
//!
//! A channel is subscribed at most once per session. The first inbound event
//! named after a subscribed channel is announced to that channel's handlers
//! with a synthesized `join` event.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct SubscriptionSet {
    requested: HashSet<String>,
    joined: HashSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns true if `Subscribe` must be sent.
    pub fn claim(&mut self, channel: &str) -> bool {
        self.requested.insert(channel.to_string())
    }

    /// Undo a claim whose `Subscribe` could not be sent
    pub fn release(&mut self, channel: &str) {
        self.requested.remove(channel);
        self.joined.remove(channel);
    }

    /// Returns true exactly once per session for the first event of a
    /// subscribed channel.
    pub fn first_arrival(&mut self, channel: &str) -> bool {
        self.contains(channel) && self.joined.insert(channel.to_string())
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.requested.contains(channel)
    }

    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    /// Subscribed channels, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.requested.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Forget everything; a new session starts unsubscribed
    pub fn clear(&mut self) {
        self.requested.clear();
        self.joined.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_once() {
        let mut subs = SubscriptionSet::new();
        assert!(subs.claim("Throughput"));
        assert!(!subs.claim("Throughput"));
        assert!(subs.claim("WorstRTT"));
        assert_eq!(subs.len(), 2);
        assert_eq!(subs.channels(), vec!["Throughput", "WorstRTT"]);
    }

    #[test]
    fn test_release() {
        let mut subs = SubscriptionSet::new();
        subs.claim("Throughput");
        subs.release("Throughput");
        assert!(subs.claim("Throughput"));
    }

    #[test]
    fn test_first_arrival_only_for_subscribed() {
        let mut subs = SubscriptionSet::new();
        assert!(!subs.first_arrival("Throughput"));

        subs.claim("Throughput");
        assert!(subs.first_arrival("Throughput"));
        assert!(!subs.first_arrival("Throughput"));
    }

    #[test]
    fn test_clear_resets_join_marker() {
        let mut subs = SubscriptionSet::new();
        subs.claim("Throughput");
        subs.first_arrival("Throughput");

        subs.clear();
        assert!(subs.is_empty());
        assert!(!subs.contains("Throughput"));

        subs.claim("Throughput");
        assert!(subs.first_arrival("Throughput"));
    }
}

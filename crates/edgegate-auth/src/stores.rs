//! In-memory identity and policy tables.
//!
//! The real identity and policy services live outside the gateway. These
//! static tables stand in for them in the binary (loaded from config) and
//! in tests.

use std::collections::HashMap;

use edgegate_protocol::{ChannelId, ClientId};

use crate::{Action, AuthError, Authorizer, IdentityStore};

/// Wildcard accepted in the client and channel positions of a [`Rule`].
pub const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// StaticIdentityStore
// ---------------------------------------------------------------------------

/// A fixed `secret → client_id` table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityStore {
    things: HashMap<String, ClientId>,
}

impl StaticIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the identity bound to `secret`.
    pub fn with_thing(mut self, secret: impl Into<String>, client_id: ClientId) -> Self {
        self.things.insert(secret.into(), client_id);
        self
    }

    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }
}

impl FromIterator<(String, ClientId)> for StaticIdentityStore {
    fn from_iter<T: IntoIterator<Item = (String, ClientId)>>(iter: T) -> Self {
        Self {
            things: iter.into_iter().collect(),
        }
    }
}

impl IdentityStore for StaticIdentityStore {
    async fn identify(&self, secret: &str) -> Result<ClientId, AuthError> {
        self.things.get(secret).cloned().ok_or(AuthError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// StaticPolicy
// ---------------------------------------------------------------------------

/// One allow rule. `client` and `channel` are exact ids or [`WILDCARD`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub client: String,
    pub channel: String,
    pub action: Action,
}

impl Rule {
    pub fn new(client: impl Into<String>, channel: impl Into<String>, action: Action) -> Self {
        Self {
            client: client.into(),
            channel: channel.into(),
            action,
        }
    }

    fn allows(&self, client_id: &ClientId, channel: &ChannelId, action: Action) -> bool {
        self.action == action
            && (self.client == WILDCARD || self.client == client_id.as_str())
            && (self.channel == WILDCARD || self.channel == channel.as_str())
    }
}

/// Deny-by-default allow list.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    rules: Vec<Rule>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl FromIterator<Rule> for StaticPolicy {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl Authorizer for StaticPolicy {
    async fn authorize(
        &self,
        client_id: &ClientId,
        channel: &ChannelId,
        action: Action,
    ) -> Result<(), AuthError> {
        if self.rules.iter().any(|r| r.allows(client_id, channel, action)) {
            return Ok(());
        }
        Err(AuthError::Denied {
            client_id: client_id.clone(),
            channel: channel.clone(),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: &str) -> ChannelId {
        ChannelId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_identify_known_secret_returns_client() {
        let store = StaticIdentityStore::new().with_thing("k1", ClientId::new("dev-1"));
        assert_eq!(store.identify("k1").await.unwrap(), ClientId::new("dev-1"));
    }

    #[tokio::test]
    async fn test_identify_unknown_secret_returns_not_found() {
        let store = StaticIdentityStore::new();
        assert!(matches!(store.identify("k1").await, Err(AuthError::NotFound)));
    }

    #[tokio::test]
    async fn test_authorize_empty_policy_denies() {
        let policy = StaticPolicy::new();
        let result = policy
            .authorize(&ClientId::new("dev-1"), &ch("c1"), Action::Publish)
            .await;
        assert!(matches!(result, Err(AuthError::Denied { .. })));
    }

    #[tokio::test]
    async fn test_authorize_exact_rule_matches_only_its_action() {
        let policy = StaticPolicy::new().allow(Rule::new("dev-1", "c1", Action::Publish));
        let dev = ClientId::new("dev-1");

        assert!(policy.authorize(&dev, &ch("c1"), Action::Publish).await.is_ok());
        assert!(policy.authorize(&dev, &ch("c1"), Action::Subscribe).await.is_err());
        assert!(policy.authorize(&dev, &ch("c2"), Action::Publish).await.is_err());
        assert!(
            policy
                .authorize(&ClientId::new("dev-2"), &ch("c1"), Action::Publish)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_authorize_wildcards_match_any() {
        let policy: StaticPolicy = [
            Rule::new(WILDCARD, "public", Action::Subscribe),
            Rule::new("admin", WILDCARD, Action::Publish),
        ]
        .into_iter()
        .collect();

        assert!(
            policy
                .authorize(&ClientId::new("anyone"), &ch("public"), Action::Subscribe)
                .await
                .is_ok()
        );
        assert!(
            policy
                .authorize(&ClientId::new("admin"), &ch("whatever"), Action::Publish)
                .await
                .is_ok()
        );
        assert!(
            policy
                .authorize(&ClientId::new("anyone"), &ch("whatever"), Action::Publish)
                .await
                .is_err()
        );
    }
}

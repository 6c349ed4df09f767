//! Static allow-list of client identifiers

use std::collections::HashSet;

/// Clients permitted to start the authorization flow.
///
/// Fixed at startup; membership is the only check performed on a client.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    allowed: HashSet<String>,
}

impl ClientRegistry {
    pub fn new<I, S>(client_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: client_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, client_id: &str) -> bool {
        self.allowed.contains(client_id)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

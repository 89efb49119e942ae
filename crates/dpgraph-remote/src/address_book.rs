//! Known parties, by id.

use std::collections::HashMap;
use std::sync::Arc;

use dpgraph_core::id::PartyId;

use crate::error::{RemoteError, Result};
use crate::party::Party;

#[derive(Debug, Default)]
pub struct AddressBook {
    parties: HashMap<PartyId, Arc<Party>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `party`, replacing any party already known under its id.
    pub fn add(&mut self, party: Arc<Party>) -> Option<Arc<Party>> {
        let id = party.id().clone();
        let previous = self.parties.insert(id.clone(), party);
        if previous.is_some() {
            #[cfg(feature = "tracing")]
            tracing::warn!(party = %id, "party already known; replacing it");
        }
        previous
    }

    /// The known party with `party`'s id, registering `party` first if the
    /// id is new.
    pub fn reference(&mut self, party: &Arc<Party>) -> Arc<Party> {
        Arc::clone(
            self.parties
                .entry(party.id().clone())
                .or_insert_with(|| Arc::clone(party)),
        )
    }

    pub fn get(&self, id: &PartyId) -> Result<Arc<Party>> {
        self.parties
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownParty(id.clone()))
    }

    pub fn contains(&self, id: &PartyId) -> bool {
        self.parties.contains_key(id)
    }

    pub fn remove(&mut self, id: &PartyId) -> Option<Arc<Party>> {
        self.parties.remove(id)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn ids(&self) -> Vec<PartyId> {
        let mut ids: Vec<_> = self.parties.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_registers_once_and_add_replaces() {
        let mut book = AddressBook::new();
        let first = Arc::new(Party::new("bob"));
        let got = book.reference(&first);
        assert!(Arc::ptr_eq(&got, &first));

        let second = Arc::new(Party::new("bob"));
        assert!(Arc::ptr_eq(&book.reference(&second), &first));

        let replaced = book.add(Arc::clone(&second)).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&book.get(&PartyId::from("bob")).unwrap(), &second));
        assert!(matches!(
            book.get(&PartyId::from("carol")),
            Err(RemoteError::UnknownParty(_))
        ));
    }
}

//! Party configuration, loaded from YAML.
//!
//! ```yaml
//! party_id: hospital-a
//! allowed_commands: [tensor.add, tensor.sum, tensor.mean]
//! known_parties: [hospital-b]
//! ```

use serde::{Deserialize, Serialize};

use dpgraph_core::id::PartyId;

use crate::error::{RemoteError, Result};
use crate::guard::CommandGuard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyConfig {
    pub party_id: PartyId,

    /// Qualified op names this party executes. Absent means every tensor op.
    #[serde(default)]
    pub allowed_commands: Option<Vec<String>>,

    /// Peers this party expects to exchange objects with.
    #[serde(default)]
    pub known_parties: Vec<PartyId>,
}

impl PartyConfig {
    pub fn new(party_id: impl Into<PartyId>) -> Self {
        Self {
            party_id: party_id.into(),
            allowed_commands: None,
            known_parties: Vec::new(),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: PartyConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.party_id.as_str().is_empty() {
            return Err(RemoteError::Config("party_id must not be empty".into()));
        }
        if self.known_parties.contains(&self.party_id) {
            return Err(RemoteError::Config(format!(
                "party {} lists itself as a known party",
                self.party_id
            )));
        }
        self.guard().map(|_| ())
    }

    pub fn guard(&self) -> Result<CommandGuard> {
        match &self.allowed_commands {
            Some(names) => CommandGuard::from_names(names.iter().cloned()),
            None => Ok(CommandGuard::default()),
        }
    }
}

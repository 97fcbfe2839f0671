//! Client configuration.
//!
//! Connection and identity settings come from the environment; the static
//! wiring of each venue comes from a JSON deployment file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
};

use crate::constants::DEFAULT_MAX_OPERANDS_PER_BATCH;
use crate::error::{OrchestratorError, Result};
use crate::venue::{Venue, VenueAdapter};

/// Base58 deserialization for `Pubkey` fields in JSON
pub mod serde_pubkey {
    use serde::{de::Error, Deserialize, Deserializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(|e| D::Error::custom(format!("{s}: {e}")))
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Pubkey>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| Pubkey::from_str(&s).map_err(|e| D::Error::custom(format!("{s}: {e}"))))
                .transpose()
        }
    }
}

/// Static wiring for every venue the deployment knows about
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DeploymentConfig {
    pub venues: Vec<VenueAdapter>,
}

impl DeploymentConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OrchestratorError::Config(format!("deployment file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn adapter(&self, venue: Venue) -> Option<&VenueAdapter> {
        self.venues.iter().find(|adapter| adapter.venue() == venue)
    }

    fn validate(&self) -> Result<()> {
        for (i, adapter) in self.venues.iter().enumerate() {
            if self.venues[..i].iter().any(|a| a.venue() == adapter.venue()) {
                return Err(OrchestratorError::Config(format!(
                    "venue {} configured twice",
                    adapter.venue()
                )));
            }
        }
        Ok(())
    }
}

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Ledger RPC endpoint
    pub rpc_url: String,

    pub commitment: CommitmentConfig,

    /// Address of the vault account
    pub vault: Pubkey,

    /// Vault program id
    pub program_id: Pubkey,

    /// Operand ceiling per submitted batch
    pub max_operands_per_batch: usize,

    /// Keypair paying for and signing every batch
    pub keypair_path: PathBuf,

    /// JSON file with the venue wiring
    pub venues_config: PathBuf,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rpc_url = lookup("RPC_URL").unwrap_or_else(|| "http://127.0.0.1:8899".to_string());

        let commitment = match lookup("COMMITMENT") {
            Some(level) => CommitmentConfig {
                commitment: CommitmentLevel::from_str(&level)
                    .map_err(|_| OrchestratorError::Config(format!("COMMITMENT: {level}")))?,
            },
            None => CommitmentConfig::confirmed(),
        };

        let vault = required_pubkey(&lookup, "VAULT_ADDRESS")?;
        let program_id = required_pubkey(&lookup, "VAULT_PROGRAM_ID")?;

        let max_operands_per_batch = match lookup("MAX_OPERANDS_PER_BATCH") {
            Some(s) => s
                .parse()
                .map_err(|_| OrchestratorError::Config(format!("MAX_OPERANDS_PER_BATCH: {s}")))?,
            None => DEFAULT_MAX_OPERANDS_PER_BATCH,
        };
        if max_operands_per_batch == 0 {
            return Err(OrchestratorError::Config(
                "MAX_OPERANDS_PER_BATCH must be positive".to_string(),
            ));
        }

        let keypair_path = lookup("KEYPAIR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("keypair.json"));

        let venues_config = lookup("VENUES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("venues.json"));

        Ok(Self {
            rpc_url,
            commitment,
            vault,
            program_id,
            max_operands_per_batch,
            keypair_path,
            venues_config,
        })
    }
}

fn required_pubkey(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Pubkey> {
    let value = lookup(key).ok_or_else(|| OrchestratorError::Config(format!("{key} is not set")))?;
    Pubkey::from_str(value.trim()).map_err(|e| OrchestratorError::Config(format!("{key}: {e}")))
}

//! Proof transaction → proof systems.

use std::sync::Arc;

use tracing::{debug, warn};

use proofindex_core::types::ProofSystem;
use proofindex_rpc::{ChainReader, TransportError};

use crate::events::decode_sub_verifiers;
use crate::registry::{VerifierEntry, VerifierRegistry};

/// Proof systems and variants backing one proof transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub proof_systems: Vec<ProofSystem>,
    pub variants: Vec<String>,
}

impl Classification {
    fn add(&mut self, entry: &VerifierEntry) {
        if !self.proof_systems.contains(&entry.system) {
            self.proof_systems.push(entry.system);
        }
        if let Some(variant) = &entry.variant {
            if !self.variants.contains(variant) {
                self.variants.push(variant.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proof_systems.is_empty()
    }
}

pub struct ProofClassifier {
    registry: Arc<VerifierRegistry>,
    reader: Arc<dyn ChainReader>,
}

impl ProofClassifier {
    pub fn new(registry: Arc<VerifierRegistry>, reader: Arc<dyn ChainReader>) -> Self {
        Self { registry, reader }
    }

    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        &self.registry
    }

    /// Classify a proof by its `proveBatches` calldata.
    ///
    /// Sub-proof verifiers win over the event's top-level verifier; undecodable
    /// calldata falls back to the top-level verifier alone.
    pub async fn classify(&self, verifier: &str, calldata: &[u8]) -> Classification {
        let subs = match decode_sub_verifiers(calldata) {
            Ok(subs) => subs,
            Err(e) => {
                debug!(verifier, error = %e, "calldata not decodable, using top-level verifier");
                Vec::new()
            }
        };
        let targets = if subs.is_empty() {
            vec![verifier.to_lowercase()]
        } else {
            subs
        };

        let mut out = Classification::default();
        for address in &targets {
            for entry in self.registry.resolve(self.reader.as_ref(), address).await {
                out.add(&entry);
            }
        }
        if out.is_empty() {
            warn!(verifier, targets = ?targets, "proof maps to no known proof system");
        }
        out
    }

    /// Fetch `tx_hash`'s calldata and classify it.
    pub async fn classify_tx(
        &self,
        verifier: &str,
        tx_hash: &str,
    ) -> Result<Classification, TransportError> {
        let input = self.reader.transaction_input(tx_hash).await?;
        Ok(self.classify(verifier, &input).await)
    }
}

//! `GovernanceLookup` — the injected collaborator that resolves virtual-key
//! values for submit/retrieve. Virtual-key issuance itself lives elsewhere;
//! only this read-only lookup is consumed here.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualKey {
    pub id: String,
    pub value: String,
}

#[async_trait]
pub trait GovernanceLookup: Send + Sync {
    async fn get_virtual_key(&self, value: &str) -> Option<VirtualKey>;
}

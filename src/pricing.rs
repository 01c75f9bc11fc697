//! `MCPCatalog` — the injected collaborator the core consumes for cost
//! attribution of MCP tool calls. The catalog's pricing CRUD surface lives
//! elsewhere; only this read-only snapshot lookup is consumed here,
//! mirroring [`crate::async_job::GovernanceLookup`].

use async_trait::async_trait;

/// One pricing entry for a `(server, tool)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingEntry {
    pub server_label: String,
    pub tool_name: String,
    pub cost_per_call: f64,
}

/// Thread-safe snapshot lookup. Implementors hand back owned clones so
/// callers iterating a batch of tool logs never hold a reference into the
/// catalog's internal lock across an await point.
#[async_trait]
pub trait MCPCatalog: Send + Sync {
    async fn get_pricing_data(&self, server_label: &str, tool_name: &str) -> Option<PricingEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    struct StaticCatalog(RwLock<HashMap<(String, String), PricingEntry>>);

    #[async_trait]
    impl MCPCatalog for StaticCatalog {
        async fn get_pricing_data(&self, server_label: &str, tool_name: &str) -> Option<PricingEntry> {
            self.0.read().unwrap().get(&(server_label.to_string(), tool_name.to_string())).cloned()
        }
    }

    #[tokio::test]
    async fn lookup_returns_an_owned_copy_not_a_borrow() {
        let mut entries = HashMap::new();
        entries.insert(
            ("web".to_string(), "search".to_string()),
            PricingEntry {
                server_label: "web".to_string(),
                tool_name: "search".to_string(),
                cost_per_call: 0.001,
            },
        );
        let catalog = StaticCatalog(RwLock::new(entries));

        let found = catalog.get_pricing_data("web", "search").await.unwrap();
        assert_eq!(found.cost_per_call, 0.001);
        assert!(catalog.get_pricing_data("web", "unknown").await.is_none());
    }
}

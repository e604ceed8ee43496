//! Fiscal.ai endpoints over the metered client
//!
//! <https://docs.fiscal.ai/docs/api-reference>

use crate::client::MeteredClient;
use crate::error::{MeteredError, Result};
use std::sync::Arc;

const COMPANIES_URL: &str = "https://api.fiscal.ai/v1/companies-list";

/// Fiscal.ai adapter
#[derive(Debug, Clone)]
pub struct FiscalAi {
    client: Arc<MeteredClient>,
}

impl FiscalAi {
    pub fn new(client: Arc<MeteredClient>) -> Self {
        Self { client }
    }

    /// Companies covered by the API, one JSON object per company
    pub async fn company_list(&self) -> Result<Vec<serde_json::Value>> {
        match self.client.fetch_json(COMPANIES_URL).await? {
            serde_json::Value::Array(companies) => Ok(companies),
            other => Err(MeteredError::Provider {
                provider: "Fiscal.ai".to_string(),
                message: format!("expected a company array, got {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::store::UsageStore;
    use crate::transport::MockTransport;

    fn adapter(transport: MockTransport) -> FiscalAi {
        let provider = ProviderConfig::new("fiscal_ai", "apiKey", vec!["F1".into()], 250);
        let store = Arc::new(UsageStore::open_in_memory("fiscal_ai").unwrap());
        let client = MeteredClient::new(provider, store, Arc::new(transport)).unwrap();
        FiscalAi::new(Arc::new(client))
    }

    #[tokio::test]
    async fn test_company_list() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(1).returning(|url| {
            assert_eq!(url, "https://api.fiscal.ai/v1/companies-list?apiKey=F1");
            Ok(r#"[{"ticker":"AAPL"},{"ticker":"MSFT"}]"#.to_string())
        });
        let fiscal = adapter(transport);

        let companies = fiscal.company_list().await.unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[1]["ticker"], "MSFT");

        // Served from cache the second time
        assert_eq!(fiscal.company_list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unexpected_shape() {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok(r#"{"message":"Unauthorized"}"#.to_string()));
        let fiscal = adapter(transport);

        assert!(fiscal.company_list().await.is_err());
    }
}

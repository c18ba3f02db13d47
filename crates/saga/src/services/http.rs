use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use reqwest::StatusCode;

use super::inventory::{InventoryClient, InventoryError, ProductInfo};

/// Inventory client for the catalog service's HTTP API.
///
/// Calls `GET {base_url}/products/{id}` and expects `{"stock": .., "price": ..}`.
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInventoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InventoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InventoryError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn product_url(&self, product_id: &ProductId) -> String {
        format!("{}/products/{}", self.base_url, product_id)
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn get_product(&self, product_id: &ProductId) -> Result<ProductInfo, InventoryError> {
        let response = self
            .client
            .get(self.product_url(product_id))
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(InventoryError::ProductNotFound(product_id.clone())),
            status if status.is_success() => response
                .json::<ProductInfo>()
                .await
                .map_err(|e| InventoryError::InvalidResponse(e.to_string())),
            status => Err(InventoryError::Unavailable(format!(
                "catalog service returned {status}"
            ))),
        }
    }
}

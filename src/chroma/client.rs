//! Chroma HTTP Client
//!
//! Direct HTTP client for Chroma's REST API. Uses reqwest instead of
//! third-party wrapper crates for stability and full API control.
//! Constructed explicitly and passed to whoever needs it.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ChromaError {
    #[error("Chroma HTTP error: {0}")]
    Http(String),
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Chroma server not available at {0}")]
    ServerUnavailable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl Serialize for ChromaError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for ChromaError {
    fn from(e: reqwest::Error) -> Self {
        ChromaError::Http(e.to_string())
    }
}

/// Chroma collection info returned by API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
    pub metadata: Option<Value>,
}

/// Result from a query operation (one inner list per query vector)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromaQueryResult {
    pub ids: Vec<Vec<String>>,
    pub documents: Option<Vec<Vec<Option<String>>>>,
    pub metadatas: Option<Vec<Vec<Option<Value>>>>,
    pub distances: Option<Vec<Vec<f32>>>,
}

/// Chroma HTTP client
#[derive(Clone)]
pub struct ChromaClient {
    http: Client,
    base_url: String,
    tenant: String,
    database: String,
}

impl ChromaClient {
    pub fn new(base_url: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v1/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }

    /// Health check: returns the nanosecond heartbeat if healthy
    pub async fn heartbeat(&self) -> Result<i64, ChromaError> {
        debug!("Chroma heartbeat check");
        let resp = self
            .http
            .get(format!("{}/api/v1/heartbeat", self.base_url))
            .send()
            .await
            .map_err(|_| ChromaError::ServerUnavailable(self.base_url.clone()))?;

        if !resp.status().is_success() {
            return Err(ChromaError::ServerUnavailable(self.base_url.clone()));
        }

        let body: Value = resp.json().await?;
        Ok(body["nanosecond heartbeat"].as_i64().unwrap_or(0))
    }

    /// Get or create a collection by name
    pub async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: Option<Value>,
    ) -> Result<CollectionInfo, ChromaError> {
        let mut body = json!({
            "name": name,
            "get_or_create": true,
        });
        if let Some(meta) = metadata {
            body["metadata"] = meta;
        }

        let resp = self.http.post(self.collections_url()).json(&body).send().await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            error!(name = %name, status = %status, "Collection get_or_create failed");
            return Err(ChromaError::Http(format!("Create collection failed ({}): {}", status, text)));
        }

        info!(name = %name, "Collection get_or_create");
        serde_json::from_str(&text).map_err(|e| ChromaError::Deserialize(format!("{}: {}", e, text)))
    }

    /// Get a collection by name (read-only, does not create)
    pub async fn get_collection(&self, name: &str) -> Result<CollectionInfo, ChromaError> {
        let collections = self.list_collections().await?;
        collections
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ChromaError::CollectionNotFound(name.to_string()))
    }

    /// List all collections
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>, ChromaError> {
        let resp = self.http.get(self.collections_url()).send().await?;

        if !resp.status().is_success() {
            return Err(ChromaError::Http(format!("List collections failed: {}", resp.status())));
        }

        resp.json().await.map_err(|e| ChromaError::Deserialize(e.to_string()))
    }

    /// Upsert records (insert or update)
    pub async fn upsert(
        &self,
        collection_id: &str,
        ids: Vec<String>,
        documents: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
    ) -> Result<(), ChromaError> {
        if ids.is_empty() {
            return Err(ChromaError::InvalidInput("ids cannot be empty".to_string()));
        }
        if documents.len() != ids.len() || embeddings.len() != ids.len() || metadatas.len() != ids.len() {
            return Err(ChromaError::InvalidInput(
                "ids, documents, embeddings and metadatas must have equal length".to_string(),
            ));
        }

        let count = ids.len();
        let body = json!({
            "ids": ids,
            "documents": documents,
            "embeddings": embeddings,
            "metadatas": metadatas,
        });

        let resp = self
            .http
            .post(format!("{}/api/v1/collections/{}/upsert", self.base_url, collection_id))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Chroma HTTP error");
            return Err(ChromaError::Http(format!("Upsert failed: {}", text)));
        }

        info!(collection = %collection_id, count = count, "Upserted documents");
        Ok(())
    }

    /// Query a collection with a single embedding
    pub async fn query(
        &self,
        collection_id: &str,
        query_embedding: &[f32],
        n_results: u32,
        include: &[&str],
    ) -> Result<ChromaQueryResult, ChromaError> {
        let body = json!({
            "query_embeddings": [query_embedding],
            "n_results": n_results,
            "include": include,
        });

        debug!(collection = %collection_id, n_results = n_results, "Querying collection");
        let resp = self
            .http
            .post(format!("{}/api/v1/collections/{}/query", self.base_url, collection_id))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Chroma HTTP error");
            return Err(ChromaError::Http(format!("Query failed: {}", text)));
        }

        resp.json().await.map_err(|e| ChromaError::Deserialize(e.to_string()))
    }

    /// Count records in a collection
    pub async fn count(&self, collection_id: &str) -> Result<u32, ChromaError> {
        let resp = self
            .http
            .get(format!("{}/api/v1/collections/{}/count", self.base_url, collection_id))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ChromaError::Http(format!("Count failed: {}", resp.status())));
        }

        let result: u32 = resp.json().await.map_err(|e| ChromaError::Deserialize(e.to_string()))?;
        debug!(collection = %collection_id, count = result, "Collection count");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ChromaClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.collections_url(),
            "http://localhost:8000/api/v1/tenants/default_tenant/databases/default_database/collections"
        );
    }

    #[test]
    fn test_query_result_parses_nulls() {
        let raw = r#"{
            "ids": [["a", "b"]],
            "documents": [["text a", null]],
            "metadatas": [[{"department": "HR"}, null]],
            "distances": [[0.1, 0.4]]
        }"#;
        let parsed: ChromaQueryResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.ids[0].len(), 2);
        assert_eq!(parsed.documents.unwrap()[0][1], None);
        assert_eq!(parsed.distances.unwrap()[0], vec![0.1, 0.4]);
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty() {
        let client = ChromaClient::new("http://127.0.0.1:9");
        let result = client.upsert("c", vec![], vec![], vec![], vec![]).await;
        assert!(matches!(result, Err(ChromaError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_upsert_rejects_ragged_columns() {
        let client = ChromaClient::new("http://127.0.0.1:9");
        let result = client
            .upsert("c", vec!["a".to_string()], vec![], vec![vec![0.0]], vec![json!({})])
            .await;
        assert!(matches!(result, Err(ChromaError::InvalidInput(_))));
    }
}

//! Google Cloud Storage object store
//!
//! Checks object existence with the JSON API metadata endpoint, the same
//! bucket the BigQuery load job reads from. Authenticates with Application
//! Default Credentials and needs `storage.objects.get`.
//!
//! Without the `bigquery` feature every call returns
//! [`WarehouseError::Config`].

use crate::adapter::{ObjectStore, WarehouseError};
use eltflow_core::ObjectRef;

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::yup_oauth2::{
    authenticator::{ApplicationDefaultCredentialsTypes, DefaultAuthenticator},
    ApplicationDefaultCredentialsAuthenticator, ApplicationDefaultCredentialsFlowOpts,
};

#[cfg(feature = "bigquery")]
const READ_ONLY_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";

#[cfg(feature = "bigquery")]
const STORAGE_API: &str = "https://storage.googleapis.com";

#[cfg(not(feature = "bigquery"))]
const NOT_COMPILED: &str = "GCS support not compiled. Rebuild with: cargo build --features bigquery";

/// Map a metadata lookup status to existence
#[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
fn object_status(status: u16, object: &ObjectRef) -> Result<bool, WarehouseError> {
    match status {
        200..=299 => Ok(true),
        404 => Ok(false),
        401 => Err(WarehouseError::Authentication(format!(
            "GCS rejected credentials for {}",
            object.uri()
        ))),
        403 => Err(WarehouseError::PermissionDenied(object.uri())),
        other => Err(WarehouseError::Network(format!(
            "GCS returned HTTP {} for {}",
            other,
            object.uri()
        ))),
    }
}

pub struct GcsObjectStore {
    #[cfg(feature = "bigquery")]
    auth: DefaultAuthenticator,

    #[cfg(feature = "bigquery")]
    http: reqwest::Client,
}

impl GcsObjectStore {
    /// Connect using Application Default Credentials
    #[cfg(feature = "bigquery")]
    pub async fn with_adc() -> Result<Self, WarehouseError> {
        let opts = ApplicationDefaultCredentialsFlowOpts::default();
        let auth = match ApplicationDefaultCredentialsAuthenticator::builder(opts).await {
            ApplicationDefaultCredentialsTypes::InstanceMetadata(builder) => builder.build().await,
            ApplicationDefaultCredentialsTypes::ServiceAccount(builder) => builder.build().await,
        }
        .map_err(|e| WarehouseError::Authentication(format!("GCS credentials: {}", e)))?;

        tracing::debug!("connected to GCS with application default credentials");
        Ok(Self {
            auth,
            http: reqwest::Client::new(),
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc() -> Result<Self, WarehouseError> {
        Err(WarehouseError::Config(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "bigquery")]
    fn metadata_url(object: &ObjectRef) -> Result<reqwest::Url, WarehouseError> {
        let mut url = reqwest::Url::parse(STORAGE_API)
            .map_err(|e| WarehouseError::Config(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| WarehouseError::Config(format!("cannot build URL for {}", object.uri())))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", object.bucket.as_str(), "o", object.path.as_str()]);
        Ok(url)
    }

    #[cfg(feature = "bigquery")]
    async fn access_token(&self) -> Result<String, WarehouseError> {
        let token = self
            .auth
            .token(&[READ_ONLY_SCOPE])
            .await
            .map_err(|e| WarehouseError::Authentication(e.to_string()))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| WarehouseError::Authentication("no access token issued".to_string()))
    }
}

#[async_trait::async_trait]
impl ObjectStore for GcsObjectStore {
    fn name(&self) -> &'static str {
        "GCS"
    }

    #[cfg(feature = "bigquery")]
    async fn exists(&self, object: &ObjectRef) -> Result<bool, WarehouseError> {
        let url = Self::metadata_url(object)?;
        let token = self.access_token().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| WarehouseError::Network(e.to_string()))?;

        let found = object_status(response.status().as_u16(), object)?;
        tracing::debug!(object = %object, found, "checked GCS object");
        Ok(found)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn exists(&self, object: &ObjectRef) -> Result<bool, WarehouseError> {
        let _ = object;
        Err(WarehouseError::Config(NOT_COMPILED.to_string()))
    }
}

//! BigQuery warehouse adapter
//!
//! Executes partition DDL as parameterized queries and submits load jobs
//! reading directly from `gs://` URIs. Requires the IAM permissions:
//! - bigquery.jobs.create
//! - bigquery.tables.create / bigquery.tables.updateData
//! - storage.objects.get (for loads)
//!
//! ## Authentication
//!
//! 1. Service account JSON file (explicit path)
//! 2. Application Default Credentials (ADC)
//!
//! ```rust,ignore
//! let warehouse = BigQueryWarehouse::with_adc("my-project").await?;
//! let job = warehouse.execute_ddl(&query, false, "US").await?;
//! ```
//!
//! Without the `bigquery` feature every call returns
//! [`WarehouseError::Config`].

use crate::adapter::{BulkLoader, JobResult, LoadRequest, LoadResult, QueryEngine, WarehouseError};
use eltflow_core::{SchemaField, SchemaMode};
use eltflow_sql::{BoundQuery, ParameterValue};

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::{
        job::Job, job_configuration::JobConfiguration,
        job_configuration_load::JobConfigurationLoad, query_parameter::QueryParameter,
        query_parameter_type::QueryParameterType, query_parameter_value::QueryParameterValue,
        job_reference::JobReference, query_request::QueryRequest, query_response::QueryResponse,
        table_reference::TableReference, table_schema::TableSchema,
    },
    Client as BigQueryClient,
};

#[cfg(not(feature = "bigquery"))]
const NOT_COMPILED: &str = "BigQuery support not compiled. Rebuild with: cargo build --features bigquery";

/// How often a running job is polled for completion
#[cfg(feature = "bigquery")]
const JOB_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// What a `jobs.query` call reported about a statement
///
/// `jobs.query` returns after a bounded wait. A statement that is still
/// running comes back with `job_complete = false` and must be polled
/// through its job before dependents may start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
struct QueryStatus {
    job_complete: Option<bool>,
    errors: Vec<String>,
    job_id: Option<String>,
    location: Option<String>,
    rows_affected: Option<u64>,
}

/// Where a statement stands after `jobs.query` returned
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
enum DdlProgress {
    Done(JobResult),
    Running { job_id: String, location: Option<String> },
}

impl QueryStatus {
    #[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
    fn progress(self) -> Result<DdlProgress, WarehouseError> {
        if self.job_complete != Some(true) {
            // errors on an unfinished job may be transient; the job's final status decides
            let job_id = self.job_id.ok_or_else(|| {
                WarehouseError::InvalidResponse("unfinished query has no job id".to_string())
            })?;
            return Ok(DdlProgress::Running {
                job_id,
                location: self.location,
            });
        }

        if !self.errors.is_empty() {
            return Err(WarehouseError::Query(self.errors.join("; ")));
        }

        Ok(DdlProgress::Done(JobResult {
            job_id: self.job_id,
            rows_affected: self.rows_affected,
        }))
    }
}

#[cfg(feature = "bigquery")]
impl From<QueryResponse> for QueryStatus {
    fn from(response: QueryResponse) -> Self {
        let reference = response.job_reference.unwrap_or_default();
        Self {
            job_complete: response.job_complete,
            errors: response
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.message.unwrap_or_else(|| "unknown error".to_string()))
                .collect(),
            job_id: reference.job_id,
            location: reference.location,
            rows_affected: response.num_dml_affected_rows.and_then(|n| n.parse().ok()),
        }
    }
}

/// BigQuery warehouse adapter
pub struct BigQueryWarehouse {
    /// Project jobs run in
    project_id: String,

    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQueryWarehouse {
    /// Connect using Application Default Credentials (ADC)
    ///
    /// ADC automatically detects credentials from:
    /// - GOOGLE_APPLICATION_CREDENTIALS environment variable
    /// - gcloud CLI default credentials
    /// - GCE/GKE metadata service
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, WarehouseError> {
        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| WarehouseError::Authentication(format!(
                "Failed to authenticate with ADC: {}. \
                 Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                e
            )))?;

        Ok(Self {
            project_id: project_id.into(),
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, WarehouseError> {
        let _ = project_id;
        Err(WarehouseError::Config(NOT_COMPILED.to_string()))
    }

    /// Connect using a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, WarehouseError> {
        let key_path = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path)
            .await
            .map_err(|e| WarehouseError::Authentication(format!(
                "Failed to read service account key file '{}': {}",
                key_path, e
            )))?;

        Ok(Self {
            project_id: project_id.into(),
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        _key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, WarehouseError> {
        let _ = project_id;
        Err(WarehouseError::Config(NOT_COMPILED.to_string()))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// BigQuery type name and API value for each bound parameter
    pub fn parameter_pairs(query: &BoundQuery) -> Vec<(String, &'static str, String)> {
        query
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.type_name(), p.value.to_api_string()))
            .collect()
    }

    /// Explicit schema in the REST API's JSON shape
    pub fn schema_json(mode: SchemaMode, fields: &[SchemaField]) -> Option<serde_json::Value> {
        if mode != SchemaMode::Explicit {
            return None;
        }
        let fields: Vec<_> = fields
            .iter()
            .map(|f| {
                serde_json::json!({
                    "name": f.name,
                    "type": f.field_type.to_uppercase(),
                    "mode": f.mode.as_deref().unwrap_or("NULLABLE").to_uppercase(),
                })
            })
            .collect();
        Some(serde_json::json!({ "fields": fields }))
    }

    #[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
    fn classify(error: String, context: &str) -> WarehouseError {
        if error.contains("Not found") {
            WarehouseError::NotFound(format!("{}: {}", context, error))
        } else if error.contains("Access Denied") || error.contains("Permission") {
            WarehouseError::PermissionDenied(format!("{}: {}", context, error))
        } else {
            WarehouseError::Query(format!("{}: {}", context, error))
        }
    }

    #[cfg(feature = "bigquery")]
    fn query_parameters(query: &BoundQuery) -> Vec<QueryParameter> {
        query
            .parameters
            .iter()
            .map(|p| QueryParameter {
                name: Some(p.name.clone()),
                parameter_type: Some(QueryParameterType {
                    array_type: None,
                    struct_types: None,
                    r#type: p.value.type_name().to_string(),
                }),
                parameter_value: Some(QueryParameterValue {
                    array_values: None,
                    struct_values: None,
                    value: Some(p.value.to_api_string()),
                }),
            })
            .collect()
    }

    /// Poll a job until BigQuery reports it done
    ///
    /// A job that finished with an error result is mapped through `failed`.
    #[cfg(feature = "bigquery")]
    async fn wait_for_job(
        &self,
        job_id: &str,
        location: &str,
        failed: fn(String) -> WarehouseError,
    ) -> Result<Job, WarehouseError> {
        loop {
            let job = self
                .client
                .job()
                .get_job(&self.project_id, job_id, Some(location))
                .await
                .map_err(|e| Self::classify(e.to_string(), job_id))?;

            let status = job.status.as_ref();
            if status.and_then(|s| s.state.as_deref()) == Some("DONE") {
                if let Some(error) = status.and_then(|s| s.error_result.as_ref()) {
                    return Err(failed(format!(
                        "job {} failed: {}",
                        job_id,
                        error.message.as_deref().unwrap_or("unknown error")
                    )));
                }
                return Ok(job);
            }

            tracing::debug!(job_id, "waiting for job");
            tokio::time::sleep(JOB_POLL_INTERVAL).await;
        }
    }
}

#[async_trait::async_trait]
impl QueryEngine for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn execute_ddl(
        &self,
        query: &BoundQuery,
        use_legacy_sql: bool,
        location: &str,
    ) -> Result<JobResult, WarehouseError> {
        let mut request = QueryRequest::new(query.sql.clone());
        request.use_legacy_sql = use_legacy_sql;
        request.location = Some(location.to_string());
        if !query.parameters.is_empty() {
            request.parameter_mode = Some("NAMED".to_string());
            request.query_parameters = Some(Self::query_parameters(query));
        }

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| Self::classify(e.to_string(), "DDL"))?;

        match QueryStatus::from(response).progress()? {
            DdlProgress::Done(result) => Ok(result),
            DdlProgress::Running { job_id, location: job_location } => {
                tracing::info!(job_id = %job_id, "statement still running, waiting for job");
                let job_location = job_location.unwrap_or_else(|| location.to_string());
                self.wait_for_job(&job_id, &job_location, WarehouseError::Query)
                    .await?;
                Ok(JobResult {
                    job_id: Some(job_id),
                    rows_affected: None,
                })
            }
        }
    }

    #[cfg(not(feature = "bigquery"))]
    async fn execute_ddl(
        &self,
        _query: &BoundQuery,
        _use_legacy_sql: bool,
        _location: &str,
    ) -> Result<JobResult, WarehouseError> {
        Err(WarehouseError::Config(NOT_COMPILED.to_string()))
    }
}

#[async_trait::async_trait]
impl BulkLoader for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn load(&self, request: &LoadRequest) -> Result<LoadResult, WarehouseError> {
        let options = &request.options;
        let destination = &request.destination;

        let schema = match Self::schema_json(options.schema_mode, &options.schema) {
            Some(json) => Some(
                serde_json::from_value::<TableSchema>(json)
                    .map_err(|e| WarehouseError::Config(format!("invalid load schema: {}", e)))?,
            ),
            None => None,
        };

        let load = JobConfigurationLoad {
            source_uris: Some(vec![request.object.uri()]),
            destination_table: Some(TableReference::new(
                &destination.project,
                &destination.dataset,
                &destination.table,
            )),
            source_format: Some(options.format.as_bigquery().to_string()),
            field_delimiter: Some(options.field_delimiter.clone()),
            skip_leading_rows: Some(i64::from(options.skip_leading_rows)),
            write_disposition: Some(options.write_disposition.as_bigquery().to_string()),
            autodetect: Some(options.schema_mode == SchemaMode::Autodetect),
            allow_jagged_rows: Some(options.allow_jagged_rows),
            ignore_unknown_values: Some(options.ignore_unknown_values),
            max_bad_records: Some(i64::from(options.max_bad_records)),
            schema,
            ..Default::default()
        };
        let job = Job {
            configuration: Some(JobConfiguration {
                load: Some(load),
                ..Default::default()
            }),
            job_reference: Some(JobReference {
                location: Some(request.location.clone()),
                project_id: Some(self.project_id.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let submitted = self
            .client
            .job()
            .insert(&self.project_id, job)
            .await
            .map_err(|e| Self::classify(e.to_string(), &destination.fqn()))?;

        let reference = submitted.job_reference.as_ref();
        let job_id = reference
            .and_then(|r| r.job_id.clone())
            .ok_or_else(|| WarehouseError::InvalidResponse("load job has no id".to_string()))?;
        let location = reference
            .and_then(|r| r.location.clone())
            .unwrap_or_else(|| request.location.clone());

        tracing::info!(job_id = %job_id, destination = %destination, location = %location, "load job submitted");
        let done = self.wait_for_job(&job_id, &location, WarehouseError::Load).await?;

        let rows_loaded = done
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        Ok(LoadResult {
            rows_loaded,
            job_id: Some(job_id),
        })
    }

    #[cfg(not(feature = "bigquery"))]
    async fn load(&self, _request: &LoadRequest) -> Result<LoadResult, WarehouseError> {
        Err(WarehouseError::Config(NOT_COMPILED.to_string()))
    }
}

/// String encoding of a parameter as sent to BigQuery
pub fn describe_parameter(name: &str, value: &ParameterValue) -> String {
    format!("@{} {} = {:?}", name, value.type_name(), value.to_api_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_are_typed() {
        let query = BoundQuery::new("SELECT * FROM t WHERE c = @partition_key")
            .bind("partition_key", ParameterValue::String("USA".to_string()))
            .unwrap();
        assert_eq!(
            BigQueryWarehouse::parameter_pairs(&query),
            vec![("partition_key".to_string(), "STRING", "USA".to_string())]
        );
        assert_eq!(
            describe_parameter("partition_key", &ParameterValue::String("USA".to_string())),
            "@partition_key STRING = \"USA\""
        );
    }

    #[test]
    fn explicit_schema_json() {
        let fields = vec![SchemaField {
            name: "Country".to_string(),
            field_type: "string".to_string(),
            mode: None,
        }];
        assert!(BigQueryWarehouse::schema_json(SchemaMode::Autodetect, &fields).is_none());

        let json = BigQueryWarehouse::schema_json(SchemaMode::Explicit, &fields).unwrap();
        assert_eq!(json["fields"][0]["type"], "STRING");
        assert_eq!(json["fields"][0]["mode"], "NULLABLE");
    }

    #[test]
    fn errors_are_classified() {
        assert!(matches!(
            BigQueryWarehouse::classify("Not found: Dataset p:t".to_string(), "ddl"),
            WarehouseError::NotFound(_)
        ));
        assert!(matches!(
            BigQueryWarehouse::classify("Access Denied".to_string(), "ddl"),
            WarehouseError::PermissionDenied(_)
        ));
    }

    fn status(job_complete: Option<bool>, errors: &[&str]) -> QueryStatus {
        QueryStatus {
            job_complete,
            errors: errors.iter().map(|e| e.to_string()).collect(),
            job_id: Some("job_1".to_string()),
            location: Some("EU".to_string()),
            rows_affected: None,
        }
    }

    #[test]
    fn unfinished_statement_must_be_polled() {
        let running = DdlProgress::Running {
            job_id: "job_1".to_string(),
            location: Some("EU".to_string()),
        };
        assert_eq!(status(Some(false), &[]).progress().unwrap(), running);
        assert_eq!(status(None, &[]).progress().unwrap(), running);
        // intermediate errors are settled by the job's final status
        assert_eq!(status(Some(false), &["slot quota"]).progress().unwrap(), running);

        let no_id = QueryStatus {
            job_id: None,
            ..status(Some(false), &[])
        };
        assert!(matches!(no_id.progress(), Err(WarehouseError::InvalidResponse(_))));
    }

    #[test]
    fn finished_statement_reports_errors_as_query_failures() {
        assert_eq!(
            status(Some(true), &[]).progress().unwrap(),
            DdlProgress::Done(JobResult {
                job_id: Some("job_1".to_string()),
                rows_affected: None,
            })
        );
        assert_eq!(
            status(Some(true), &["Not found: Table p:s.global_data"]).progress(),
            Err(WarehouseError::Query("Not found: Table p:s.global_data".to_string()))
        );
    }

    #[test]
    #[cfg(feature = "bigquery")]
    fn query_response_still_running() {
        let response: QueryResponse = serde_json::from_value(serde_json::json!({
            "kind": "bigquery#queryResponse",
            "jobComplete": false,
            "jobReference": {
                "projectId": "elt-pipeline-gcp-and-airflow",
                "jobId": "job_abc",
                "location": "US"
            }
        }))
        .unwrap();

        assert_eq!(
            QueryStatus::from(response).progress().unwrap(),
            DdlProgress::Running {
                job_id: "job_abc".to_string(),
                location: Some("US".to_string()),
            }
        );
    }

    #[tokio::test]
    #[cfg(not(feature = "bigquery"))]
    async fn disabled_without_feature() {
        let result = BigQueryWarehouse::with_adc("my-project").await;
        assert!(matches!(result, Err(WarehouseError::Config(msg)) if msg.contains("--features bigquery")));
    }
}

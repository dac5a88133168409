//! AWS Marketplace Metering client.
//!
//! `RegisterUsage` has billing side effects. The SDK's own retries are turned
//! off and nothing in this module retries; a failed call is surfaced once and
//! the caller's scheduler decides.

use crate::protocol::models::{RegisterUsageRequest, RegisterUsageResponse};
use crate::MeterwardenError;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_marketplacemetering::config::http::HttpResponse;
use aws_sdk_marketplacemetering::config::retry::RetryConfig;
use aws_sdk_marketplacemetering::config::timeout::TimeoutConfig;
use aws_sdk_marketplacemetering::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_marketplacemetering::operation::register_usage::RegisterUsageError;
use aws_sdk_marketplacemetering::{config, Client};
use std::time::Duration;

const DEFAULT_REGION: &str = "us-east-1";
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Registers usage with a metering service.
#[async_trait]
pub trait MeteringClient: Send + Sync {
    /// Register usage and return the signed confirmation.
    async fn register_usage(
        &self,
        request: &RegisterUsageRequest,
    ) -> Result<RegisterUsageResponse, MeterwardenError>;
}

/// AWS Marketplace Metering client.
#[derive(Debug, Clone)]
pub struct AwsMeteringClient {
    client: Client,
}

impl AwsMeteringClient {
    /// Create a client from a loaded AWS configuration.
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self::from_builder(config::Builder::from(sdk_config))
    }

    /// Create a client from the default AWS provider chains.
    ///
    /// Credentials come from the environment, web identity (IRSA), profile
    /// files or instance metadata. Region falls back to `us-east-1`.
    ///
    /// # Errors
    /// Returns `Credentials` if no credentials provider could be configured.
    pub async fn from_env() -> Result<Self, MeterwardenError> {
        let region = RegionProviderChain::default_provider().or_else(DEFAULT_REGION);
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;
        if sdk_config.credentials_provider().is_none() {
            return Err(MeterwardenError::Credentials(
                "no AWS credentials provider configured".to_string(),
            ));
        }
        Ok(Self::new(&sdk_config))
    }

    /// Send requests to `endpoint` instead of the regional service endpoint.
    ///
    /// # Errors
    /// Returns `ConfigError` unless `endpoint` is an `http://` or `https://` URL with a host.
    pub fn with_endpoint(self, endpoint: &str) -> Result<Self, MeterwardenError> {
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .map(|rest| rest.split('/').next().unwrap_or(rest))
            .unwrap_or_default();
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(MeterwardenError::ConfigError(format!(
                "Invalid metering endpoint: {:?}",
                endpoint
            )));
        }
        Ok(Self::from_builder(
            self.client.config().to_builder().endpoint_url(endpoint),
        ))
    }

    /// Get the configured region.
    pub fn region(&self) -> Option<&str> {
        self.client.config().region().map(|r| r.as_ref())
    }

    fn from_builder(builder: config::Builder) -> Self {
        let conf = builder
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(OPERATION_TIMEOUT)
                    .build(),
            )
            .build();
        Self {
            client: Client::from_conf(conf),
        }
    }
}

#[async_trait]
impl MeteringClient for AwsMeteringClient {
    async fn register_usage(
        &self,
        request: &RegisterUsageRequest,
    ) -> Result<RegisterUsageResponse, MeterwardenError> {
        let output = self
            .client
            .register_usage()
            .product_code(&request.product_code)
            .public_key_version(request.public_key_version)
            .nonce(&request.nonce)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let signature = output.signature().ok_or_else(|| {
            MeterwardenError::ProtocolError("RegisterUsage response carries no signature".to_string())
        })?;
        let rotation = output
            .public_key_rotation_timestamp()
            .map(|t| t.as_secs_f64());

        tracing::debug!(
            target: "meterwarden::metering",
            rotation = ?rotation,
            "usage registered"
        );

        Ok(RegisterUsageResponse {
            signature: signature.to_string(),
            public_key_rotation_timestamp: rotation,
        })
    }
}

fn map_sdk_error(err: SdkError<RegisterUsageError, HttpResponse>) -> MeterwardenError {
    match &err {
        SdkError::ServiceError(service) => {
            let api = service.err();
            MeterwardenError::MeteringApi {
                status: service.raw().status().as_u16(),
                code: api.code().unwrap_or("UnknownError").to_string(),
                message: api.message().unwrap_or_default().to_string(),
            }
        }
        SdkError::ResponseError(_) => {
            MeterwardenError::ProtocolError(DisplayErrorContext(&err).to_string())
        }
        _ => MeterwardenError::MeteringTransport(DisplayErrorContext(&err).to_string()),
    }
}

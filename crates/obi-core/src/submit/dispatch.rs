//! Delivery of submission requests to a master

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tracing::debug;

use crate::config::Settings;
use crate::error::{ObiError, Result};
use crate::proto::{JobSubmissionRequest, JobSubmissionResponse, ObiMasterClient};
use crate::resolver::Endpoint;

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn submit(
        &self,
        master: &Endpoint,
        request: JobSubmissionRequest,
    ) -> Result<JobSubmissionResponse>;
}

/// Per-call credentials checked by the master's interceptor
#[derive(Debug, Clone)]
pub struct RpcCredentials {
    pub username: String,
    pub password: String,
}

/// gRPC dispatcher; opens one channel per submission
#[derive(Debug, Clone)]
pub struct GrpcDispatcher {
    connect_timeout: Duration,
    request_timeout: Duration,
    credentials: Option<RpcCredentials>,
    ca_cert_path: Option<PathBuf>,
}

impl Default for GrpcDispatcher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            credentials: None,
            ca_cert_path: None,
        }
    }
}

impl GrpcDispatcher {
    pub fn from_settings(settings: &Settings) -> Self {
        let credentials = match (&settings.rpc_username, &settings.rpc_password) {
            (Some(username), Some(password)) => Some(RpcCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Self {
            connect_timeout: Duration::from_secs(settings.rpc_connect_timeout_secs),
            request_timeout: Duration::from_secs(settings.rpc_timeout_secs),
            credentials,
            ca_cert_path: settings.rpc_ca_cert_path.clone(),
        }
    }

    pub fn credentials(mut self, credentials: RpcCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    async fn tls_config(&self, master: &Endpoint) -> Result<Option<ClientTlsConfig>> {
        let Some(path) = &self.ca_cert_path else {
            return Ok(None);
        };
        let pem = tokio::fs::read(path).await.map_err(|e| ObiError::io(path, e))?;
        Ok(Some(
            ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(pem))
                .domain_name(master.host.clone()),
        ))
    }

    async fn connect(&self, master: &Endpoint) -> Result<Channel> {
        let tls = self.tls_config(master).await?;
        let scheme = if tls.is_some() { "https" } else { "http" };
        let unreachable = |reason: String| ObiError::ServiceUnreachable {
            service: master.to_string(),
            reason,
        };

        let mut endpoint = Channel::from_shared(format!("{}://{}", scheme, master))
            .map_err(|e| unreachable(e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);
        if let Some(tls) = tls {
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| unreachable(e.to_string()))?;
        }

        debug!(master = %master, "Connecting to master");
        endpoint.connect().await.map_err(|e| unreachable(e.to_string()))
    }

    fn request(&self, body: JobSubmissionRequest) -> Result<tonic::Request<JobSubmissionRequest>> {
        let mut request = tonic::Request::new(body);
        if let Some(credentials) = &self.credentials {
            let invalid =
                |_| ObiError::InvalidConfiguration("RPC credentials must be ASCII".to_string());
            let username: MetadataValue<Ascii> = credentials.username.parse().map_err(invalid)?;
            let password: MetadataValue<Ascii> = credentials.password.parse().map_err(invalid)?;
            request.metadata_mut().insert("username", username);
            request.metadata_mut().insert("password", password);
        }
        Ok(request)
    }
}

#[async_trait]
impl JobDispatcher for GrpcDispatcher {
    async fn submit(
        &self,
        master: &Endpoint,
        request: JobSubmissionRequest,
    ) -> Result<JobSubmissionResponse> {
        let channel = self.connect(master).await?;
        let mut client = ObiMasterClient::new(channel);

        let response = client
            .submit_job(self.request(request)?)
            .await
            .map_err(|status| {
                ObiError::Dispatch(format!("{:?}: {}", status.code(), status.message()))
            })?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Protocol;

    #[test]
    fn test_credentials_become_metadata() {
        let dispatcher = GrpcDispatcher::default().credentials(RpcCredentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        });
        let request = dispatcher.request(JobSubmissionRequest::default()).unwrap();
        assert_eq!(request.metadata().get("username").unwrap(), "alice");
        assert_eq!(request.metadata().get("password").unwrap(), "hunter2");
    }

    #[test]
    fn test_from_settings_needs_both_credentials() {
        let settings = Settings {
            rpc_username: Some("alice".to_string()),
            ..Default::default()
        };
        let dispatcher = GrpcDispatcher::from_settings(&settings);
        assert!(dispatcher.credentials.is_none());
        assert_eq!(dispatcher.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unreachable_master() {
        let dispatcher = GrpcDispatcher {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let master = Endpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
            protocol: Protocol::Tcp,
        };
        let err = dispatcher
            .submit(&master, JobSubmissionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ObiError::ServiceUnreachable { .. }));
    }
}

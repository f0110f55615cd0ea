//! Wire types for the master's job submission service
//!
//! With the `proto-gen` feature the code is generated at build time by
//! tonic-build from `proto/obi/master/v1/master.proto`. Otherwise the
//! equivalent hand-maintained types below are used.

#[cfg(feature = "proto-gen")]
pub mod obi {
    pub mod master {
        pub mod v1 {
            tonic::include_proto!("obi.master.v1");
        }
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod obi {
    pub mod master {
        pub mod v1 {
            use prost::Message;

            #[derive(Clone, PartialEq, Message)]
            pub struct JobSubmissionRequest {
                #[prost(string, tag = "1")]
                pub executable_path: String,
                #[prost(string, tag = "2")]
                pub infrastructure: String,
                #[prost(enumeration = "job_submission_request::JobType", tag = "3")]
                pub r#type: i32,
                #[prost(string, tag = "4")]
                pub job_args: String,
                #[prost(int32, tag = "5")]
                pub priority: i32,
            }

            pub mod job_submission_request {
                #[derive(
                    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
                )]
                #[repr(i32)]
                pub enum JobType {
                    Pyspark = 0,
                }

                impl JobType {
                    pub fn as_str_name(&self) -> &'static str {
                        match self {
                            JobType::Pyspark => "PYSPARK",
                        }
                    }

                    pub fn from_str_name(value: &str) -> Option<Self> {
                        match value {
                            "PYSPARK" => Some(Self::Pyspark),
                            _ => None,
                        }
                    }
                }
            }

            #[derive(Clone, PartialEq, Message)]
            pub struct JobSubmissionResponse {
                #[prost(bool, tag = "1")]
                pub succeeded: bool,
                #[prost(int32, tag = "2")]
                pub job_id: i32,
            }

            pub mod obi_master_client {
                use super::*;
                use tonic::codegen::*;
                use tonic::transport::Uri;

                #[derive(Debug, Clone)]
                pub struct ObiMasterClient<T> {
                    inner: tonic::client::Grpc<T>,
                }

                impl ObiMasterClient<tonic::transport::Channel> {
                    pub fn new(channel: tonic::transport::Channel) -> Self {
                        let inner = tonic::client::Grpc::new(channel);
                        Self { inner }
                    }
                }

                impl<T> ObiMasterClient<T>
                where
                    T: tonic::client::GrpcService<tonic::body::BoxBody>,
                    T::Error: Into<StdError>,
                    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
                {
                    pub fn with_origin(inner: T, origin: Uri) -> Self {
                        let inner = tonic::client::Grpc::with_origin(inner, origin);
                        Self { inner }
                    }

                    pub async fn submit_job(
                        &mut self,
                        request: impl tonic::IntoRequest<JobSubmissionRequest>,
                    ) -> Result<tonic::Response<JobSubmissionResponse>, tonic::Status> {
                        self.inner.ready().await.map_err(|e| {
                            tonic::Status::new(
                                tonic::Code::Unknown,
                                format!("Service was not ready: {}", e.into()),
                            )
                        })?;
                        let codec = tonic::codec::ProstCodec::default();
                        let path = http::uri::PathAndQuery::from_static(
                            "/obi.master.v1.ObiMaster/SubmitJob",
                        );
                        self.inner.unary(request.into_request(), path, codec).await
                    }
                }
            }
        }
    }
}

pub use obi::master::v1::job_submission_request::JobType as WireJobType;
pub use obi::master::v1::obi_master_client::ObiMasterClient;
pub use obi::master::v1::*;

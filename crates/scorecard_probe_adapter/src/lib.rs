#![forbid(unsafe_code)]

pub mod client;
pub mod grpc;

pub mod grpc_api {
    tonic::include_proto!("cresta.v1.coaching");
}

pub use client::{
    CoachingClient, CoachingScorecard, ScoreSpec, ScorecardPatch, ScorecardSpec, SubmissionSource,
};
pub use grpc::{BearerInterceptor, GrpcCoachingClient, GrpcConfig};

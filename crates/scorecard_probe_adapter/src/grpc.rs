#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scorecard_probe_contracts::{Deadline, ProbeError};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Response, Status};

use crate::client::{
    CoachingClient, CoachingScorecard, ScoreSpec, ScorecardPatch, ScorecardSpec, SubmissionSource,
};
use crate::grpc_api::coaching_service_client::CoachingServiceClient;
use crate::grpc_api::{
    CreateScorecardRequest, ResetScorecardRequest, Score, Scorecard, ScorecardSubmissionSource,
    SubmitScorecardRequest, UpdateScorecardRequest,
};

pub const GRPC_HOST_DEFAULT: &str = "grpc.chat-staging.cresta.ai:443";
const CONNECT_TIMEOUT_MS_DEFAULT: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcConfig {
    /// `host:port`, or a full `http://`/`https://` URI.
    pub target: String,
    pub connect_timeout: Duration,
}

impl GrpcConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS_DEFAULT),
        }
    }

    /// Bare `host:port` targets are dialled over TLS.
    pub fn uri(&self) -> String {
        if self.target.starts_with("http://") || self.target.starts_with("https://") {
            self.target.clone()
        } else {
            format!("https://{}", self.target)
        }
    }

    fn uses_tls(&self) -> bool {
        self.uri().starts_with("https://")
    }
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self::new(GRPC_HOST_DEFAULT)
    }
}

/// Stamps `authorization: Bearer <token>` on every outgoing request.
#[derive(Clone)]
pub struct BearerInterceptor {
    header: MetadataValue<Ascii>,
}

impl BearerInterceptor {
    /// Accepts a raw token or one already prefixed with `Bearer `.
    pub fn new(token: &str) -> Result<Self, ProbeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ProbeError::Auth("bearer token is empty".to_string()));
        }
        let value = match (token.get(..7), token.get(7..)) {
            (Some(prefix), Some(rest))
                if prefix.eq_ignore_ascii_case("bearer ") && !rest.trim().is_empty() =>
            {
                format!("Bearer {}", rest.trim_start())
            }
            _ => format!("Bearer {token}"),
        };
        let header = value
            .parse::<MetadataValue<Ascii>>()
            .map_err(|_| ProbeError::Auth("bearer token is not valid header text".to_string()))?;
        Ok(Self { header })
    }
}

impl Interceptor for BearerInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("authorization", self.header.clone());
        Ok(request)
    }
}

type AuthedClient = CoachingServiceClient<InterceptedService<Channel, BearerInterceptor>>;

/// Coaching client over one reusable channel. Cloning shares the channel.
#[derive(Clone)]
pub struct GrpcCoachingClient {
    inner: AuthedClient,
}

impl GrpcCoachingClient {
    pub async fn connect(config: &GrpcConfig, token: &str) -> Result<Self, ProbeError> {
        let interceptor = BearerInterceptor::new(token)?;
        let unavailable = |cause: String| ProbeError::GatewayUnavailable {
            backend: "coaching",
            cause,
        };
        let mut endpoint = Endpoint::from_shared(config.uri())
            .map_err(|e| ProbeError::Config(format!("invalid grpc target {}: {e}", config.target)))?
            .connect_timeout(config.connect_timeout);
        if config.uses_tls() {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| unavailable(format!("tls setup failed: {e}")))?;
        }
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(Self::from_channel(channel, interceptor))
    }

    pub fn from_channel(channel: Channel, interceptor: BearerInterceptor) -> Self {
        Self {
            inner: CoachingServiceClient::with_interceptor(channel, interceptor),
        }
    }
}

fn request<T>(deadline: Deadline, message: T) -> Request<T> {
    let mut req = Request::new(message);
    let remaining = deadline.remaining();
    if !remaining.is_zero() {
        req.set_timeout(remaining);
    }
    req
}

async fn guarded<T, F>(deadline: Deadline, op: &'static str, call: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    let at = tokio::time::Instant::from_std(deadline.instant());
    match tokio::time::timeout_at(at, call).await {
        Ok(Ok(resp)) => Ok(resp.into_inner()),
        Ok(Err(status)) => Err(ProbeError::RemoteFailure {
            op,
            cause: format!("{:?}: {}", status.code(), status.message()),
        }),
        Err(_) => Err(ProbeError::RemoteFailure {
            op,
            cause: "deadline exceeded".to_string(),
        }),
    }
}

fn required_scorecard(
    op: &'static str,
    scorecard: Option<Scorecard>,
) -> Result<CoachingScorecard, ProbeError> {
    scorecard
        .map(CoachingScorecard::from)
        .ok_or_else(|| ProbeError::RemoteFailure {
            op,
            cause: "response carried no scorecard".to_string(),
        })
}

fn to_wire_scores(scores: &[ScoreSpec]) -> Vec<Score> {
    scores
        .iter()
        .map(|s| Score {
            criterion_id: s.criterion_id.clone(),
            numeric_value: s.numeric,
            ..Default::default()
        })
        .collect()
}

fn to_wire_source(source: SubmissionSource) -> ScorecardSubmissionSource {
    match source {
        SubmissionSource::Unspecified => ScorecardSubmissionSource::Unspecified,
        SubmissionSource::ClosedConversations => ScorecardSubmissionSource::ClosedConversations,
    }
}

fn timestamp_to_utc(ts: &prost_types::Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(ts.nanos).ok()?;
    DateTime::from_timestamp(ts.seconds, nanos)
}

impl From<Scorecard> for CoachingScorecard {
    fn from(sc: Scorecard) -> Self {
        CoachingScorecard {
            submitted_at: sc.submit_time.as_ref().and_then(timestamp_to_utc),
            score: sc.score.map(f64::from),
            scores: sc
                .scores
                .into_iter()
                .map(|s| ScoreSpec {
                    criterion_id: s.criterion_id,
                    numeric: s.numeric_value,
                })
                .collect(),
            name: sc.name,
        }
    }
}

#[async_trait]
impl CoachingClient for GrpcCoachingClient {
    async fn create(
        &self,
        deadline: Deadline,
        parent: &str,
        spec: &ScorecardSpec,
    ) -> Result<CoachingScorecard, ProbeError> {
        let mut client = self.inner.clone();
        let body = CreateScorecardRequest {
            parent: parent.to_string(),
            scorecard: Some(Scorecard {
                template_name: spec.template_name.clone(),
                agent_user_name: spec.agent_user_name.clone(),
                conversation_name: spec.conversation_name.clone(),
                scores: to_wire_scores(&spec.scores),
                submission_source: to_wire_source(spec.source) as i32,
                ..Default::default()
            }),
        };
        let resp = guarded(
            deadline,
            "Create",
            client.create_scorecard(request(deadline, body)),
        )
        .await?;
        required_scorecard("Create", resp.scorecard)
    }

    async fn update(
        &self,
        deadline: Deadline,
        name: &str,
        patch: &ScorecardPatch,
    ) -> Result<CoachingScorecard, ProbeError> {
        let mut client = self.inner.clone();
        let body = UpdateScorecardRequest {
            scorecard: Some(Scorecard {
                name: name.to_string(),
                scores: to_wire_scores(&patch.scores),
                ..Default::default()
            }),
        };
        let resp = guarded(
            deadline,
            "Update",
            client.update_scorecard(request(deadline, body)),
        )
        .await?;
        required_scorecard("Update", resp.scorecard)
    }

    async fn submit(&self, deadline: Deadline, name: &str) -> Result<CoachingScorecard, ProbeError> {
        let mut client = self.inner.clone();
        let body = SubmitScorecardRequest {
            name: name.to_string(),
        };
        let resp = guarded(
            deadline,
            "Submit",
            client.submit_scorecard(request(deadline, body)),
        )
        .await?;
        required_scorecard("Submit", resp.scorecard)
    }

    async fn reset(&self, deadline: Deadline, name: &str) {
        let mut client = self.inner.clone();
        let body = ResetScorecardRequest {
            name: name.to_string(),
        };
        if let Err(err) = guarded(
            deadline,
            "Reset",
            client.reset_scorecard(request(deadline, body)),
        )
        .await
        {
            tracing::debug!(scorecard = name, error = %err, "reset failed; ignoring");
        }
    }
}

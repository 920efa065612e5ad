//! Retry policy tests against scripted transports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use opsbench_oracle::{
    GenerateRequest, GenerationFailure, GenerationParams, Oracle, OracleClient, OracleConfig,
    OracleTransport, TransportError, TransportResponse,
};
use tokio::time::Instant;

/// Transport that always fails the same way and records call instants.
struct AlwaysFailing {
    outcome: Result<TransportResponse, TransportError>,
    calls: Mutex<Vec<Instant>>,
}

impl AlwaysFailing {
    fn new(outcome: Result<TransportResponse, TransportError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OracleTransport for AlwaysFailing {
    async fn send(&self, request: &GenerateRequest) -> Result<TransportResponse, TransportError> {
        assert_eq!(request.contents[0].role, "user");
        self.calls.lock().unwrap().push(Instant::now());
        self.outcome.clone()
    }
}

#[tokio::test(start_paused = true)]
async fn connection_errors_exhaust_exactly_max_attempts() {
    let transport = AlwaysFailing::new(Err(TransportError::Connect("connection refused".into())));
    let config = OracleConfig::new("test-key")
        .with_max_attempts(3)
        .with_backoff(1_000, 8_000);
    let client = OracleClient::with_transport(config, transport.clone());

    let err = client
        .generate("translate this model", &GenerationParams::synthesis())
        .await
        .unwrap_err();

    match err {
        GenerationFailure::Transient {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("expected Transient, got {:?}", other),
    }

    let times = transport.call_times();
    assert_eq!(times.len(), 3);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_millis(1_000));
    assert!(gaps[1] >= gaps[0], "backoff must be non-decreasing: {:?}", gaps);
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried_identically() {
    let transport = AlwaysFailing::new(Ok(TransportResponse::new(500, "internal")));
    let client = OracleClient::with_transport(
        OracleConfig::new("k").with_max_attempts(4).with_backoff(100, 250),
        transport.clone(),
    );

    let err = client
        .generate("p", &GenerationParams::classification())
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let times = transport.call_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
    assert!(gaps.iter().all(|g| *g <= Duration::from_millis(250) + Duration::from_millis(1)));
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_fast() {
    let transport = AlwaysFailing::new(Ok(TransportResponse::new(403, "forbidden")));
    let client = OracleClient::with_transport(OracleConfig::new("k"), transport.clone());

    let err = client
        .generate("p", &GenerationParams::synthesis())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GenerationFailure::Rejected {
            status: Some(403),
            ..
        }
    ));
    assert_eq!(transport.call_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn single_attempt_budget_does_not_sleep() {
    let transport = AlwaysFailing::new(Err(TransportError::Timeout));
    let client = OracleClient::with_transport(
        OracleConfig::new("k").with_max_attempts(1),
        transport.clone(),
    );

    let start = Instant::now();
    let err = client
        .generate("p", &GenerationParams::synthesis())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationFailure::Transient { attempts: 1, .. }));
    assert_eq!(Instant::now() - start, Duration::ZERO);
}

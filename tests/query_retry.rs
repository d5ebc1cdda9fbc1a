// tests/query_retry.rs
//
// Retry loop timing against a scripted transport, with tokio's clock paused
// so backoff sleeps auto-advance instantly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use factcheck_bot::analysis::{
    AnalysisResult, CompletionRequest, CompletionResponse, CompletionTransport, QueryClient,
    QueryError, QueryMode, Verdict, FACTCHECK_FALLBACK, MOREINFO_FALLBACK,
};

struct Scripted {
    replies: Mutex<VecDeque<Result<CompletionResponse, QueryError>>>,
    calls: Mutex<Vec<Instant>>,
}

impl Scripted {
    fn new(replies: Vec<Result<CompletionResponse, QueryError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    fn gaps(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }
}

#[async_trait]
impl CompletionTransport for Scripted {
    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> Result<CompletionResponse, QueryError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(QueryError::Api { status: 500 }))
    }
}

fn ok_verdict() -> Result<CompletionResponse, QueryError> {
    Ok(CompletionResponse::with_content(
        "True|The claim matches official records.",
        vec!["https://records.example/a".into()],
    ))
}

fn client(t: &Arc<Scripted>) -> QueryClient {
    QueryClient::new(t.clone(), "test-model")
}

#[tokio::test(start_paused = true)]
async fn three_api_errors_then_success_waits_with_growing_backoff() {
    let t = Scripted::new(vec![
        Err(QueryError::Api { status: 500 }),
        Err(QueryError::Api { status: 502 }),
        Err(QueryError::Api { status: 503 }),
        ok_verdict(),
    ]);

    let result = client(&t).query("the claim", QueryMode::FactCheck).await;

    match result {
        AnalysisResult::FactCheck(fc) => {
            assert_eq!(fc.verdict, Verdict::True);
            assert_eq!(fc.citations, vec!["https://records.example/a".to_string()]);
        }
        other => panic!("expected fact-check, got {other:?}"),
    }

    assert_eq!(t.call_times().len(), 4);
    let bounds = [(1_000, 2_000), (2_000, 3_000), (4_000, 5_000)];
    for (gap, (lo, hi)) in t.gaps().into_iter().zip(bounds) {
        assert!(
            gap >= Duration::from_millis(lo) && gap <= Duration::from_millis(hi),
            "gap {gap:?} outside [{lo}ms, {hi}ms]"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_exactly_retry_after() {
    let t = Scripted::new(vec![
        Err(QueryError::RateLimit {
            retry_after: Duration::from_secs(60),
        }),
        ok_verdict(),
    ]);

    let _ = client(&t).query("claim", QueryMode::FactCheck).await;

    let gaps = t.gaps();
    assert_eq!(gaps.len(), 1);
    assert!(gaps[0] >= Duration::from_secs(60));
    assert!(gaps[0] < Duration::from_millis(60_100));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_fallback_after_five_attempts() {
    let t = Scripted::new(vec![]);

    let result = client(&t).query("claim", QueryMode::FactCheck).await;

    assert_eq!(t.call_times().len(), 5);
    match result {
        AnalysisResult::FactCheck(fc) => {
            assert_eq!(fc.verdict, Verdict::Unverified);
            assert_eq!(fc.explanation, FACTCHECK_FALLBACK);
            assert!(fc.citations.is_empty());
        }
        other => panic!("expected fallback fact-check, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn info_fallback_has_no_details() {
    let t = Scripted::new(vec![]);

    let result = client(&t).query("topic", QueryMode::MoreInfo).await;

    match result {
        AnalysisResult::Info(info) => {
            assert_eq!(info.main_info, MOREINFO_FALLBACK);
            assert!(info.details.is_empty());
            assert!(info.sources.is_empty());
        }
        other => panic!("expected fallback info, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unparseable_verdict_is_retried() {
    let t = Scripted::new(vec![
        Ok(CompletionResponse::with_content("Perhaps|hard to say", vec![])),
        ok_verdict(),
    ]);

    let result = client(&t).try_query("claim", QueryMode::FactCheck).await;

    assert!(result.is_ok());
    assert_eq!(t.call_times().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn try_query_surfaces_last_error_kind() {
    let t = Scripted::new(vec![
        Err(QueryError::Network("reset".into())),
        Err(QueryError::Network("reset".into())),
        Err(QueryError::Network("reset".into())),
        Err(QueryError::Network("reset".into())),
        Err(QueryError::Network("reset".into())),
    ]);

    let err = client(&t)
        .try_query("claim", QueryMode::MoreInfo)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "NETWORK_ERROR");
}

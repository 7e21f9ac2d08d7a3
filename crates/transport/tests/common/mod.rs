use std::net::SocketAddr;

use axum::Router;
use trendscope_core::event::ProgressEvent;
use trendscope_core::key::CorrelationKey;
use trendscope_core::phase::{JobKind, JobPhase};

/// Credential the stub backends accept.
pub const GOOD_TOKEN: &str = "good-token";

/// Serve `router` on an ephemeral loopback port and return its address.
pub async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    addr
}

/// An analyze job event with the given sequence.
pub fn analyze_event(job_id: i64, phase: JobPhase, sequence: u64) -> ProgressEvent {
    ProgressEvent::new(CorrelationKey::bulk(JobKind::BulkAnalyze, job_id), phase, sequence)
}

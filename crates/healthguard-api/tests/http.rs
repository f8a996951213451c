use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use healthguard_api::{AppState, build_router};
use healthguard_core::{
    ChatMessage, GatewayPolicy, LanguageModel, LanguageModelGateway, ModelError, ResearchPipeline,
    Specialist, SpecialistError, SpecialistRegistry, SpecialistSink,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

struct CannedModel;

#[async_trait]
impl LanguageModel for CannedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let prompt = &messages.last().expect("prompt").content;
        if prompt.contains("Synthesize the findings") {
            Ok("# Air quality and asthma\n\nBoth sources reported.".into())
        } else {
            Ok("Research PM2.5 and asthma rates in California".into())
        }
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

struct FakeSpecialist {
    name: &'static str,
    delay: Duration,
}

#[async_trait]
impl Specialist for FakeSpecialist {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(
        &self,
        _prompt: &str,
        sink: &mut SpecialistSink,
    ) -> Result<String, SpecialistError> {
        sink.tool_call("lookup", json!({"agent": self.name}));
        sleep(self.delay).await;
        Ok(format!("{} findings", self.name))
    }
}

fn state_with(delay: Duration, max_concurrent_runs: usize) -> AppState {
    let registry = Arc::new(SpecialistRegistry::builtin().unwrap());
    let gateway = Arc::new(LanguageModelGateway::new(
        Arc::new(CannedModel),
        GatewayPolicy::default(),
    ));
    let mut builder = ResearchPipeline::builder(Arc::clone(&registry), gateway)
        .keepalive(Duration::from_millis(50))
        .specialist_timeout(Duration::from_secs(30));
    for name in [
        "EPHT_Agent",
        "OpenData_Agent",
        "HealthcareAccess_Agent",
        "MedlinePlus_Agent",
        "OpenFDA_Agent",
    ] {
        builder = builder.specialist(name, Arc::new(FakeSpecialist { name, delay }));
    }
    AppState::new(Arc::new(builder.build().unwrap()), max_concurrent_runs)
}

fn server(state: AppState) -> TestServer {
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn chat_streams_events_until_the_final_report() {
    let server = server(state_with(Duration::from_millis(10), 2));

    let response = server
        .post("/chat")
        .json(&json!({ "query": "air quality and asthma in California" }))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("cache-control"), "no-cache");
    assert_eq!(response.header("x-accel-buffering"), "no");

    let body = response.text();
    assert!(body.contains("event: phase_update"), "{body}");
    assert!(body.contains("event: tool_call"), "{body}");
    assert!(body.contains("EPHT_Agent completed research"), "{body}");
    assert!(body.contains("OpenData_Agent completed research"), "{body}");
    assert_eq!(body.matches("event: final_report").count(), 1, "{body}");

    let last_event = body
        .lines()
        .filter(|line| line.starts_with("event: "))
        .last()
        .unwrap();
    assert_eq!(last_event, "event: final_report");

    let marker = "Run started: ";
    let start = body.find(marker).expect("run id announced") + marker.len();
    let run_id = &body[start..start + 36];

    let status = timeout(Duration::from_secs(5), async {
        loop {
            let response = server.get(&format!("/runs/{run_id}")).await;
            assert_eq!(response.status_code(), 200);
            let payload = response.json::<serde_json::Value>();
            if payload["state"] == "completed" {
                return payload;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("run did not complete in time");

    assert_eq!(status["query"], "air quality and asthma in California");
    let specialists = status["report"]["specialists"].as_array().unwrap();
    assert_eq!(specialists.len(), 2);
    assert!(
        status["report"]["content"]
            .as_str()
            .unwrap()
            .starts_with("# Air quality")
    );
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let server = server(state_with(Duration::ZERO, 2));
    let response = server.post("/chat").json(&json!({ "query": "   " })).await;
    assert_eq!(response.status_code(), 400);
    let body = response.json::<serde_json::Value>();
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn unknown_and_malformed_run_ids() {
    let server = server(state_with(Duration::ZERO, 2));
    let response = server.get("/runs/not-a-uuid").await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .get("/runs/00000000-0000-4000-8000-000000000000")
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn route_is_a_dry_run() {
    let server = server(state_with(Duration::ZERO, 2));

    let response = server
        .post("/route")
        .json(&json!({ "query": "air quality and asthma in California" }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["specialists"], json!(["EPHT_Agent", "OpenData_Agent"]));

    let response = server
        .post("/route")
        .json(&json!({ "query": "anything else" }))
        .await;
    let body = response.json::<serde_json::Value>();
    assert_eq!(
        body["specialists"],
        json!(["EPHT_Agent", "OpenData_Agent", "HealthcareAccess_Agent"])
    );
}

#[tokio::test]
async fn specialists_listing_marks_the_default_set() {
    let server = server(state_with(Duration::ZERO, 2));
    let response = server.get("/specialists").await;
    assert_eq!(response.status_code(), 200);

    let body = response.json::<serde_json::Value>();
    let specialists = body["specialists"].as_array().unwrap();
    assert_eq!(specialists.len(), 5);
    let defaults: Vec<_> = specialists
        .iter()
        .filter(|s| s["default"] == true)
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        defaults,
        vec!["EPHT_Agent", "OpenData_Agent", "HealthcareAccess_Agent"]
    );
    assert!(specialists[0]["keywords"].as_array().unwrap().len() > 1);
}

#[tokio::test]
async fn saturated_service_reports_not_ready_and_refuses_new_runs() {
    let state = state_with(Duration::from_secs(20), 1);
    let server = server(state.clone());

    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), 200);

    let (_run_id, _stream) = state
        .start_run("air quality".to_string())
        .expect("first run accepted");

    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), 503);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["capacity"]["available_permits"], 0);
    assert_eq!(body["capacity"]["running_runs"], 1);

    let response = server.get("/health/live").await;
    assert_eq!(response.status_code(), 200);

    let response = server
        .post("/chat")
        .json(&json!({ "query": "air quality" }))
        .await;
    assert_eq!(response.status_code(), 429);
}

async fn wait_for_state(server: &TestServer, run_id: &str, wanted: u16) {
    timeout(Duration::from_secs(5), async {
        loop {
            let response = server.get(&format!("/runs/{run_id}")).await;
            let code = response.status_code().as_u16();
            if code == wanted
                && (wanted != 200 || response.json::<serde_json::Value>()["state"] == "completed")
            {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("run did not reach the expected state in time");
}

#[tokio::test]
async fn oldest_finished_runs_are_evicted_past_the_retention_cap() {
    let state = state_with(Duration::ZERO, 2).with_max_retained_runs(1);
    let server = server(state.clone());

    let (first, mut stream) = state.start_run("air quality".to_string()).unwrap();
    while stream.next_item().await.is_some() {}
    let first = first.to_string();
    wait_for_state(&server, &first, 200).await;

    let (second, mut stream) = state.start_run("asthma".to_string()).unwrap();
    while stream.next_item().await.is_some() {}
    let second = second.to_string();
    wait_for_state(&server, &second, 200).await;

    wait_for_state(&server, &first, 404).await;
    let response = server.get(&format!("/runs/{second}")).await;
    assert_eq!(response.status_code(), 200);
}

//! Briefing jobs run end to end against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use briefwise_briefing::{
    ActionItems, BriefingInputs, BriefingOptions, BriefingService, Collaborators, FinalBriefing,
    MarketAnalysis, OfferAnalysis, OutcomeAssessment, SupplierSummary,
};
use briefwise_collaborators::SearchResult;
use briefwise_collaborators::testing::{ScriptedModel, StaticResearch};
use briefwise_engine::{InMemoryJobStore, JobStore, ProgressItem, RunnerOptions};
use briefwise_shared::{BriefwiseError, EventStatus, JobId, JobSnapshot, JobStatus, ProgressEvent, Topology};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const PARSE_KEY: &str = "extracting structured information";
const RESEARCH_KEY: &str = "web search results";
const ANALYZE_KEY: &str = "negotiation strategist";
const SUPPLIER_KEY: &str = "structured company profile";
const MARKET_KEY: &str = "strategic procurement analyst";
const OFFER_KEY: &str = "contract analysis expert";
const OUTCOME_KEY: &str = "strategic negotiation advisor";
const ACTIONS_KEY: &str = "procurement action planning expert";

fn form() -> Value {
    json!({
        "supplier_name": "Acme Cloud",
        "supplier_contact": "sales@acme.test",
        "product_description": "Managed Kubernetes platform",
        "product_type": "software",
        "offer_price": "$48,000",
        "pricing_model": "yearly",
        "max_price": "$55,000",
        "target_price": "$50,000",
        "value_assessment": "high_impact"
    })
}

fn inputs() -> BriefingInputs {
    BriefingInputs::new("doc-42")
        .supplier_offer("Acme Cloud offers a managed Kubernetes platform for $48,000 per year.")
        .initial_request("We need a managed Kubernetes platform with a 99.9% SLA.")
        .form(form())
}

fn research_draft() -> Value {
    json!({
        "company_overview": {
            "description": "Acme Cloud runs managed container platforms.",
            "size": "500 employees",
            "location": "Berlin",
            "industry": "Cloud infrastructure"
        },
        "key_facts": ["Founded 2012", "ISO 27001 certified"],
        "recent_news": ["Opened a Paris region"]
    })
}

fn briefing_draft() -> Value {
    json!({
        "market_analysis": {
            "alternatives_overview": "Two regional providers compete on price.",
            "price_positioning": "Competitive",
            "key_risks": ["Vendor lock-in", "Egress fees", "Support hours", "Extra risk"]
        },
        "offer_analysis": {
            "completeness_score": 7,
            "completeness_notes": "No cancellation policy",
            "price_assessment": "Below target",
            "hidden_cost_warnings": ["Egress billed separately"]
        },
        "outcome_assessment": {
            "negotiation_leverage": ["Alternatives exist"],
            "recommended_tactics": ["Ask for multi-year discount", "Request SLA credits"]
        },
        "action_items": [
            { "category": "price", "action": "Negotiate a multi-year discount", "recommended": true },
            { "category": "terms", "action": "Add a cancellation clause", "recommended": true },
            { "category": "scope", "action": "Confirm the support hours", "recommended": true }
        ]
    })
}

fn options(topology: Topology) -> BriefingOptions {
    BriefingOptions {
        topology,
        subscriber_buffer: 256,
        runner: RunnerOptions {
            start_defer: Duration::ZERO,
            keepalive: Duration::from_secs(1),
        },
    }
}

fn service(
    topology: Topology,
    llm: ScriptedModel,
    research: StaticResearch,
) -> (BriefingService, Arc<ScriptedModel>, Arc<StaticResearch>, Arc<InMemoryJobStore>) {
    let llm = Arc::new(llm);
    let research = Arc::new(research);
    let store = Arc::new(InMemoryJobStore::new());
    let service = BriefingService::new(
        Collaborators::new(llm.clone(), research.clone()),
        store.clone(),
        options(topology),
    )
    .unwrap();
    (service, llm, research, store)
}

fn tiered_model() -> ScriptedModel {
    tiered_rules(ScriptedModel::new())
}

/// Happy-path answers for every tiered step. Rules already on `model` take
/// precedence.
fn tiered_rules(model: ScriptedModel) -> ScriptedModel {
    model
        .respond(
            SUPPLIER_KEY,
            json!({
                "description": "Acme Cloud runs managed container platforms.",
                "size": "500 employees",
                "location": "Berlin",
                "industry": "Cloud infrastructure",
                "key_facts": ["Founded 2012", "ISO 27001 certified"],
                "recent_news": ["Opened a Paris region"],
                "contact_info": "Not available"
            }),
        )
        .respond(
            MARKET_KEY,
            json!({
                "alternatives_overview": "Two regional providers compete on price.",
                "price_positioning": "Competitive",
                "key_risks": ["Vendor lock-in"]
            }),
        )
        .respond(
            OFFER_KEY,
            json!({
                "completeness_score": "8",
                "completeness_notes": "SLA present, no exit terms",
                "price_assessment": "Under target",
                "hidden_cost_warnings": ["Egress billed separately"]
            }),
        )
        .respond(
            OUTCOME_KEY,
            json!({
                "negotiation_leverage": ["Competing quotes"],
                "recommended_tactics": ["Anchor on the target price"]
            }),
        )
        .respond(
            ACTIONS_KEY,
            json!({
                "action_items": [
                    { "category": "price", "action": "Ask for a 5% discount", "recommended": true },
                    { "category": "timeline", "action": "Fix the go-live date", "recommended": false }
                ]
            }),
        )
}

fn output<T: serde::de::DeserializeOwned>(snapshot: &JobSnapshot, slot: &str) -> T {
    let value = snapshot
        .output(slot)
        .unwrap_or_else(|| panic!("slot {slot} is empty"));
    serde_json::from_value(value.clone()).unwrap()
}

async fn collect_events(
    service: &BriefingService,
    job_id: &JobId,
    inputs: BriefingInputs,
) -> (JobSnapshot, Vec<ProgressEvent>) {
    let stream = service.subscribe_progress(job_id);
    let handle = service.start_job(job_id.clone(), inputs);
    let items: Vec<ProgressItem> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("progress stream ended");
    let snapshot = handle.await.unwrap();
    let events = items
        .into_iter()
        .filter_map(|item| match item {
            ProgressItem::Event(event) => Some(event),
            ProgressItem::Keepalive => None,
        })
        .collect();
    (snapshot, events)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_offer_fails_before_any_work() {
    let (service, llm, research, _) = service(
        Topology::Chain,
        ScriptedModel::new().otherwise(json!({})),
        StaticResearch::answering("facts"),
    );
    let job_id = JobId::new();
    let inputs = BriefingInputs::new("doc-1")
        .initial_request("request")
        .form(form());

    let (snapshot, events) = collect_events(&service, &job_id, inputs).await;

    assert_eq!(snapshot.status, JobStatus::Error);
    assert_eq!(snapshot.errors, vec!["Missing supplier offer PDF text"]);
    assert!(snapshot.output("parsed_input").is_none());
    assert!(snapshot.output("final_briefing").is_none());
    assert_eq!(llm.calls(), 0);
    assert_eq!(research.calls(), 0);

    let parse_errors: Vec<_> = events
        .iter()
        .filter(|e| e.agent == "parse" && e.status == EventStatus::Error)
        .collect();
    assert_eq!(parse_errors.len(), 1);
    assert_eq!(parse_errors[0].message, "Missing supplier offer PDF text");
    assert!(events.iter().all(|e| e.agent != "research" && e.agent != "analyze"));
}

#[tokio::test]
async fn tiered_validation_failure_skips_every_branch() {
    let (service, llm, _, _) = service(
        Topology::Tiered,
        tiered_model(),
        StaticResearch::answering("facts"),
    );
    let inputs = BriefingInputs::new("doc-2")
        .supplier_offer("offer")
        .initial_request("request");

    let snapshot = service.run_job(JobId::new(), inputs).await;

    assert_eq!(snapshot.status, JobStatus::Error);
    assert_eq!(snapshot.errors, vec!["Missing form data"]);
    assert_eq!(llm.calls(), 0);
}

// ---------------------------------------------------------------------------
// Chain topology
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chain_produces_full_briefing() {
    let (service, llm, research, store) = service(
        Topology::Chain,
        ScriptedModel::new()
            .respond(RESEARCH_KEY, research_draft())
            .respond(ANALYZE_KEY, briefing_draft()),
        StaticResearch::answering("Acme Cloud is a Berlin based provider."),
    );
    let job_id = JobId::new();

    let (snapshot, events) = collect_events(&service, &job_id, inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Completed, "{:?}", snapshot.errors);
    assert!(snapshot.errors.is_empty());
    assert!(snapshot.warnings.is_empty(), "{:?}", snapshot.warnings);
    assert_eq!(research.calls(), 2);
    assert_eq!(llm.calls(), 2);

    let briefing: FinalBriefing = output(&snapshot, "final_briefing");
    assert_eq!(
        briefing.supplier_summary.company_overview.description,
        "Acme Cloud runs managed container platforms."
    );
    assert_eq!(briefing.market_analysis.key_risks.len(), 3);
    assert_eq!(briefing.offer_analysis.completeness_score, 7);
    assert!(briefing.outcome_assessment.target_achievable);
    assert_eq!(briefing.outcome_assessment.confidence, "High");
    assert_eq!(briefing.outcome_assessment.recommended_tactics.len(), 3);
    assert_eq!(briefing.action_items.len(), 5);
    assert_eq!(briefing.action_items.iter().filter(|a| a.recommended).count(), 2);

    let last = events.last().unwrap();
    assert_eq!(last.status, EventStatus::Completed);
    assert_eq!(last.progress, 1.0);
    let mut previous = 0.0;
    for event in &events {
        assert!(event.progress >= previous, "progress went backwards");
        previous = event.progress;
    }

    let stored = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.output("final_briefing").is_some());
}

#[tokio::test]
async fn search_timeout_degrades_to_warning() {
    let (service, llm, _, _) = service(
        Topology::Chain,
        ScriptedModel::new()
            .respond(RESEARCH_KEY, research_draft())
            .respond(ANALYZE_KEY, briefing_draft()),
        StaticResearch::failing("request timed out"),
    );

    let snapshot = service.run_job(JobId::new(), inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.errors.is_empty());
    assert_eq!(snapshot.warnings.len(), 1);
    assert!(snapshot.warnings[0].starts_with("research: "), "{}", snapshot.warnings[0]);
    // Aggregation is skipped without search results; only the briefing call runs.
    assert_eq!(llm.calls(), 1);

    let briefing: FinalBriefing = output(&snapshot, "final_briefing");
    assert_eq!(
        briefing.supplier_summary.company_overview.description,
        "Acme Cloud - research unavailable"
    );
}

#[tokio::test]
async fn chain_analysis_failure_keeps_research() {
    let (service, _, _, _) = service(
        Topology::Chain,
        ScriptedModel::new()
            .respond(RESEARCH_KEY, research_draft())
            .fail(ANALYZE_KEY, "rate limited"),
        StaticResearch::answering("facts"),
    );

    let snapshot = service.run_job(JobId::new(), inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Error);
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.errors[0].starts_with("Briefing generation error: "));
    assert!(snapshot.output("research").is_some());
    assert!(snapshot.output("final_briefing").is_none());
}

#[tokio::test]
async fn alternatives_are_extracted_during_parse() {
    let (service, llm, _, _) = service(
        Topology::Chain,
        ScriptedModel::new()
            .respond(
                PARSE_KEY,
                json!({ "alternatives": [
                    { "name": "Blue Orbit", "description": "Hosted clusters" },
                    { "name": " " }
                ]}),
            )
            .respond(RESEARCH_KEY, research_draft())
            .respond(ANALYZE_KEY, briefing_draft()),
        StaticResearch::answering("facts"),
    );
    let inputs = inputs().alternatives("Blue Orbit - hosted clusters, hello@blueorbit.test");

    let snapshot = service.run_job(JobId::new(), inputs).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    let parsed = snapshot.output("parsed_input").unwrap();
    assert_eq!(parsed["alternatives"].as_array().unwrap().len(), 1);
    assert_eq!(parsed["alternatives"][0]["name"], "Blue Orbit");

    let briefing_prompt = llm
        .prompts()
        .into_iter()
        .find(|p| p.system.contains(ANALYZE_KEY))
        .unwrap();
    assert!(briefing_prompt.user.contains("Blue Orbit"));
}

// ---------------------------------------------------------------------------
// Tiered topology
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tiered_fills_every_slot() {
    let (service, _, _, _) = service(
        Topology::Tiered,
        tiered_model(),
        StaticResearch::answering("Industry data"),
    );
    let job_id = JobId::new();

    let (snapshot, events) = collect_events(&service, &job_id, inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Completed, "{:?}", snapshot.errors);
    assert!(snapshot.warnings.is_empty(), "{:?}", snapshot.warnings);

    let summary: SupplierSummary = output(&snapshot, "supplier_summary");
    assert_eq!(summary.key_facts.len(), 5);
    assert_eq!(summary.recent_news.len(), 3);
    assert_eq!(summary.contact_info, "sales@acme.test");

    let market: MarketAnalysis = output(&snapshot, "market_analysis");
    assert_eq!(market.key_risks.len(), 3);

    let offer: OfferAnalysis = output(&snapshot, "offer_analysis");
    assert_eq!(offer.completeness_score, 8);

    let outcome: OutcomeAssessment = output(&snapshot, "outcome_assessment");
    assert!(outcome.target_achievable);
    assert_eq!(outcome.partnership_recommendation, "Strategic Partner");

    let actions: ActionItems = output(&snapshot, "action_items");
    assert_eq!(actions.items.len(), 5);
    assert_eq!(actions.items.iter().filter(|a| a.recommended).count(), 2);

    for step in [
        "parse",
        "supplier_summary",
        "market_analysis",
        "offer_analysis",
        "outcome_assessment",
        "action_items",
    ] {
        assert!(
            events
                .iter()
                .any(|e| e.agent == step && e.status == EventStatus::Completed),
            "no completion event for {step}"
        );
        assert_eq!(snapshot.per_step_progress.get(step), Some(&1.0), "{step}");
    }
    assert_eq!(events.last().unwrap().status, EventStatus::Completed);
}

#[tokio::test]
async fn supplier_summary_failure_is_only_a_warning() {
    let (service, _, _, _) = service(
        Topology::Tiered,
        tiered_rules(ScriptedModel::new().fail(SUPPLIER_KEY, "upstream 503")),
        StaticResearch::answering("Industry data"),
    );

    let snapshot = service.run_job(JobId::new(), inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.errors.is_empty());
    assert_eq!(snapshot.warnings.len(), 1);
    assert!(
        snapshot.warnings[0].starts_with("supplier_summary: "),
        "{}",
        snapshot.warnings[0]
    );
    assert!(snapshot.output("action_items").is_some());
}

#[tokio::test]
async fn market_failure_keeps_sibling_outputs() {
    let (service, llm, _, _) = service(
        Topology::Tiered,
        tiered_rules(ScriptedModel::new().fail(MARKET_KEY, "context length exceeded")),
        StaticResearch::answering("Industry data"),
    );

    let snapshot = service.run_job(JobId::new(), inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Error);
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.errors[0].starts_with("Market analysis error: "));
    assert!(snapshot.output("supplier_summary").is_some());
    assert!(snapshot.output("offer_analysis").is_some());
    assert!(snapshot.output("market_analysis").is_none());
    assert!(snapshot.output("outcome_assessment").is_none());
    assert!(snapshot.output("action_items").is_none());
    assert!(
        llm.prompts()
            .iter()
            .all(|p| !p.system.contains(OUTCOME_KEY) && !p.system.contains(ACTIONS_KEY))
    );
}

#[tokio::test]
async fn outcome_failure_falls_back_to_rules() {
    let (service, _, _, _) = service(
        Topology::Tiered,
        tiered_rules(ScriptedModel::new().fail(OUTCOME_KEY, "malformed")),
        StaticResearch::answering("Industry data"),
    );

    let snapshot = service.run_job(JobId::new(), inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.warnings.len(), 1);
    let outcome: OutcomeAssessment = output(&snapshot, "outcome_assessment");
    assert!(outcome.target_achievable);
    assert_eq!(outcome.recommended_tactics[0], "Highlight offer gaps");
    assert!(snapshot.output("action_items").is_some());
}

#[tokio::test]
async fn partial_research_failure_still_informs_analysis() {
    let research = StaticResearch::answering("Industry data")
        .on("hidden costs", SearchResult::failed("timeout"));
    let (service, llm, _, _) = service(Topology::Tiered, tiered_model(), research);

    let snapshot = service.run_job(JobId::new(), inputs()).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    let offer_prompt = llm
        .prompts()
        .into_iter()
        .find(|p| p.system.contains(OFFER_KEY))
        .unwrap();
    assert!(offer_prompt.user.contains("DELIVERABLES:"));
    assert!(!offer_prompt.user.contains("HIDDEN_COSTS:"));
}

// ---------------------------------------------------------------------------
// Service surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finished_jobs_are_served_from_the_store() {
    let (service, _, _, store) = service(
        Topology::Chain,
        ScriptedModel::new()
            .respond(RESEARCH_KEY, research_draft())
            .respond(ANALYZE_KEY, briefing_draft()),
        StaticResearch::answering("facts"),
    );
    let first = service.run_job(JobId::new(), inputs()).await;
    let second = service
        .run_job(JobId::new(), BriefingInputs::new("doc-x"))
        .await;

    let fetched = service.get_job(&first.job_id).await.unwrap().unwrap();
    assert_eq!(fetched.status, JobStatus::Completed);
    assert_eq!(fetched.step_outputs, first.step_outputs);

    let listed = service.list_jobs().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|s| s.job_id == second.job_id && s.status == JobStatus::Error));
    assert_eq!(store.len(), 2);

    let unknown = JobId::new();
    assert!(service.get_job(&unknown).await.unwrap().is_none());
    let err = service.job(&unknown).await.unwrap_err();
    assert!(matches!(err, BriefwiseError::JobNotFound(_)), "{err}");
    assert_eq!(service.job(&first.job_id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn submitted_job_runs_in_background() {
    let (service, _, _, _) = service(
        Topology::Chain,
        ScriptedModel::new()
            .respond(RESEARCH_KEY, research_draft())
            .respond(ANALYZE_KEY, briefing_draft())
            .with_latency(Duration::from_millis(20)),
        StaticResearch::answering("facts"),
    );

    let job_id = service.submit(inputs());
    let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(snapshot) = service.get_job(&job_id).await.unwrap() {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job finished");

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(service.topology(), Topology::Chain);
}

//! Final briefing synthesis for the chain topology.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::{ANALYZE, Collaborators, PARSE, RESEARCH, require};
use crate::rules::{
    alternatives_listing, clean_list, completeness_score, confidence_for, fit_action_items,
    fit_list, or_defaults, partnership_for, target_achievable, truncate,
};
use crate::schema::{
    ActionCategory, ActionItem, FinalBriefing, MarketAnalysis, OfferAnalysis, OutcomeAssessment,
    ParsedInput, ResearchOutput, SupplierSummary,
};
use crate::state::BriefingState;

const BRIEFING_SYSTEM: &str = "You are an expert negotiation strategist creating a comprehensive briefing \
for procurement negotiations. Answer with a JSON object with keys:\n\
- `market_analysis`: `alternatives_overview`, `price_positioning` (\"Insufficient data\" without market \
pricing), `key_risks` (at most 3)\n\
- `offer_analysis`: `completeness_score` (1-10, based on SLA, cancellation policy, warranty, pricing \
breakdown and technical specs), `completeness_notes`, `price_assessment` (offer vs target and max price), \
`hidden_cost_warnings`\n\
- `outcome_assessment`: `negotiation_leverage`, `recommended_tactics` (3-5 concrete tips)\n\
- `action_items`: 5 to 10 objects with `category` (price, terms, timeline or scope), `action` and \
`recommended` (exactly 2 true)\n\
Be specific and actionable.";

const OFFER_MAX_CHARS: usize = 8000;

pub(super) const DEFAULT_LEVERAGE: [&str; 3] = [
    "Multiple alternatives available",
    "Gaps in offer provide leverage",
    "Market competition",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    market_analysis: MarketDraft,
    offer_analysis: OfferDraft,
    outcome_assessment: OutcomeDraft,
    action_items: Vec<ActionDraft>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MarketDraft {
    alternatives_overview: Option<String>,
    price_positioning: Option<String>,
    key_risks: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OfferDraft {
    completeness_score: Value,
    completeness_notes: Option<String>,
    price_assessment: Option<String>,
    hidden_cost_warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutcomeDraft {
    negotiation_leverage: Vec<String>,
    recommended_tactics: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ActionDraft {
    category: String,
    action: String,
    recommended: bool,
}

impl From<ActionDraft> for ActionItem {
    fn from(draft: ActionDraft) -> Self {
        ActionItem {
            category: ActionCategory::from_label(&draft.category),
            action: draft.action.trim().to_string(),
            recommended: draft.recommended,
        }
    }
}

pub struct AnalyzeStep {
    collaborators: Collaborators,
}

impl AnalyzeStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn prompt(parsed: &ParsedInput, research: &ResearchOutput) -> String {
    let form = &parsed.form_data;
    let joined = |items: &[String], empty: &str| {
        if items.is_empty() {
            empty.to_string()
        } else {
            items.join("\n")
        }
    };
    format!(
        "SUPPLIER OFFER (PDF extract):\n{offer}\n\n\
FORM DATA:\n- Supplier: {supplier}\n- Product: {product} ({product_type})\n\
- Offer price: {offer_price} ({pricing})\n- Target price: {target}\n- Max price: {max}\n\
- Value assessment: {value}\n\n\
RESEARCH RESULTS:\nCompany overview: {overview}\nKey facts:\n{facts}\nRecent news:\n{news}\n\n\
ALTERNATIVE SUPPLIERS:\n{alternatives}\n\n\
ADDITIONAL CONTEXT:\n{context}\n\nGenerate the complete briefing.",
        offer = truncate(&parsed.supplier_offer_text, OFFER_MAX_CHARS),
        supplier = form.supplier_name,
        product = form.product_description,
        product_type = form.product_type,
        offer_price = form.offer_price,
        pricing = form.pricing_model.as_str(),
        target = form.target_price,
        max = form.max_price,
        value = form.value_assessment.as_str(),
        overview = research.company_overview.description,
        facts = joined(&research.key_facts, "No key facts available"),
        news = joined(&research.recent_news, "No recent news available"),
        alternatives = alternatives_listing(&parsed.alternatives, "No description"),
        context = parsed.additional_context.as_deref().unwrap_or("None provided"),
    )
}

/// Turn the model's draft into a briefing, with rule-derived fields taking
/// precedence over anything the model said.
fn assemble(parsed: &ParsedInput, research: &ResearchOutput, draft: Draft) -> FinalBriefing {
    let form = &parsed.form_data;

    let supplier_summary = SupplierSummary {
        company_overview: research.company_overview.clone(),
        key_facts: research.key_facts.clone(),
        recent_news: research.recent_news.clone(),
        contact_info: research
            .contact_info
            .clone()
            .unwrap_or_else(|| "Contact information not available".into()),
    };

    let market = draft.market_analysis;
    let market_analysis = MarketAnalysis {
        alternatives_overview: market
            .alternatives_overview
            .unwrap_or_else(|| alternatives_listing(&parsed.alternatives, "No description")),
        price_positioning: market
            .price_positioning
            .unwrap_or_else(|| "Insufficient data".into()),
        key_risks: clean_list(market.key_risks, 3),
    };

    let offer = draft.offer_analysis;
    let offer_analysis = OfferAnalysis {
        completeness_score: completeness_score(&offer.completeness_score),
        completeness_notes: offer
            .completeness_notes
            .unwrap_or_else(|| "Unable to assess completeness".into()),
        price_assessment: offer.price_assessment.unwrap_or_else(|| {
            format!(
                "Offer price: {}, Target: {}, Max: {}",
                form.offer_price, form.target_price, form.max_price
            )
        }),
        hidden_cost_warnings: clean_list(offer.hidden_cost_warnings, 10),
    };

    let outcome = draft.outcome_assessment;
    let outcome_assessment = OutcomeAssessment {
        target_achievable: target_achievable(&form.offer_price, &form.target_price)
            .unwrap_or(false),
        confidence: confidence_for(form.value_assessment).into(),
        negotiation_leverage: or_defaults(
            clean_list(outcome.negotiation_leverage, 5),
            &DEFAULT_LEVERAGE,
        ),
        recommended_tactics: fit_list(
            clean_list(outcome.recommended_tactics, 5),
            3,
            5,
            "Request additional concessions",
        ),
        partnership_recommendation: partnership_for(form.value_assessment).into(),
    };

    let action_items = fit_action_items(
        draft.action_items.into_iter().map(ActionItem::from).collect(),
        5,
        10,
    );

    FinalBriefing {
        supplier_summary,
        market_analysis,
        offer_analysis,
        outcome_assessment,
        action_items,
    }
}

#[async_trait]
impl Step<BriefingState> for AnalyzeStep {
    type Output = FinalBriefing;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(ANALYZE, "final_briefing")
            .reads([PARSE, RESEARCH])
            .weight(4.0)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<FinalBriefing> {
        &state.final_briefing
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<FinalBriefing> {
        ctx.running("Generating negotiation briefing...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let research = require!(ctx.dependency(RESEARCH, |s| &s.research));
        info!(alternatives = parsed.alternatives.len(), "synthesizing briefing");

        let request = LlmRequest::new(BRIEFING_SYSTEM, prompt(parsed, research)).temperature(0.5);
        let draft: Draft = match self.collaborators.llm.invoke_structured(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(error = %e, "briefing generation failed");
                return StepOutcome::fatal(format!("Briefing generation error: {e}"));
            }
        };

        let briefing = assemble(parsed, research, draft);
        info!(
            target_achievable = briefing.outcome_assessment.target_achievable,
            action_items = briefing.action_items.len(),
            "briefing assembled"
        );
        ctx.completed("Briefing generation complete");
        StepOutcome::Ok(briefing)
    }
}

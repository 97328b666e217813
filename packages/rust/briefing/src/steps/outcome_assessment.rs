//! Negotiation strategy built on the market and offer analyses.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest, SearchQuery};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::analyze::DEFAULT_LEVERAGE;
use super::{Collaborators, MARKET_ANALYSIS, OFFER_ANALYSIS, OUTCOME_ASSESSMENT, PARSE, require};
use crate::rules::{
    clean_list, confidence_for, fit_list, or_defaults, partnership_for, research_context,
    target_achievable,
};
use crate::schema::{FormData, OutcomeAssessment, ProductType};
use crate::state::BriefingState;

const STRATEGY_SYSTEM: &str = "You are a strategic negotiation advisor. Based on the research and analysis, \
answer with a JSON object with keys `negotiation_leverage` (3-5 specific leverage points from alternatives, \
gaps, market position and urgency) and `recommended_tactics` (3-5 concrete tactical tips for this \
negotiation). Focus on what gives the buyer power.";

const RESULT_MAX_CHARS: usize = 500;
const DEFAULT_TACTICS: [&str; 3] = [
    "Highlight offer gaps",
    "Reference alternatives",
    "Emphasize value assessment",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    negotiation_leverage: Vec<String>,
    recommended_tactics: Vec<String>,
}

pub struct OutcomeAssessmentStep {
    collaborators: Collaborators,
}

impl OutcomeAssessmentStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn queries(product_type: ProductType) -> Vec<SearchQuery> {
    vec![
        SearchQuery::new(
            "tactics",
            format!("negotiation tactics {product_type} contracts best practices"),
        )
        .with_system_prompt("Provide specific, actionable negotiation tactics for this type of deal."),
        SearchQuery::new(
            "leverage",
            format!("supplier negotiation leverage points {product_type} procurement"),
        )
        .with_system_prompt("Identify common leverage points buyers have in these negotiations."),
    ]
}

/// Rule-derived fields plus the model's leverage and tactics, padded to
/// their bounds.
fn assess(form: &FormData, draft: Draft) -> OutcomeAssessment {
    OutcomeAssessment {
        target_achievable: target_achievable(&form.offer_price, &form.target_price)
            .unwrap_or(false),
        confidence: confidence_for(form.value_assessment).into(),
        negotiation_leverage: or_defaults(clean_list(draft.negotiation_leverage, 5), &DEFAULT_LEVERAGE),
        recommended_tactics: fit_list(
            or_defaults(clean_list(draft.recommended_tactics, 5), &DEFAULT_TACTICS),
            3,
            5,
            "Request additional concessions",
        ),
        partnership_recommendation: partnership_for(form.value_assessment).into(),
    }
}

#[async_trait]
impl Step<BriefingState> for OutcomeAssessmentStep {
    type Output = OutcomeAssessment;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(OUTCOME_ASSESSMENT, "outcome_assessment")
            .reads([PARSE, MARKET_ANALYSIS, OFFER_ANALYSIS])
            .weight(1.5)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<OutcomeAssessment> {
        &state.outcome_assessment
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<OutcomeAssessment> {
        ctx.running("Starting outcome assessment...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let market = require!(ctx.dependency(MARKET_ANALYSIS, |s| &s.market_analysis));
        let offer = require!(ctx.dependency(OFFER_ANALYSIS, |s| &s.offer_analysis));
        let form = &parsed.form_data;

        ctx.milestone_with_detail(
            "Researching negotiation tactics...",
            format!("Finding leverage for {} deals", form.product_type),
            0.2,
        );
        let queries = queries(form.product_type);
        let results = self.collaborators.research.batch_search(&queries).await;
        let context = research_context(&queries, &results, RESULT_MAX_CHARS);
        ctx.milestone("Research complete, building strategy...", 0.5);

        // Rules first so the prompt states the same verdict the output will carry.
        let baseline = assess(form, Draft::default());
        let request = LlmRequest::new(
            STRATEGY_SYSTEM,
            format!(
                "Supplier: {}\nTarget achievable: {}\nConfidence: {}\n\nPricing:\n- Offer: {}\n- Target: {}\n\
- Max: {}\n\nOffer completeness score: {}/10\n\nAlternatives: {}\n\nKey risks: {}\n\nIndustry research:\n{}",
                form.supplier_name,
                if baseline.target_achievable { "Yes" } else { "No" },
                baseline.confidence,
                form.offer_price,
                form.target_price,
                form.max_price,
                offer.completeness_score,
                market.alternatives_overview,
                if market.key_risks.is_empty() {
                    "None identified".to_string()
                } else {
                    market.key_risks.join(", ")
                },
                if context.is_empty() { "None available" } else { context.as_str() },
            ),
        )
        .temperature(0.4);

        match self.collaborators.llm.invoke_structured::<Draft>(&request).await {
            Ok(draft) => {
                let assessment = assess(form, draft);
                info!(target_achievable = assessment.target_achievable, "outcome assessed");
                ctx.completed(if assessment.target_achievable {
                    "Outcome assessment complete - target achievable"
                } else {
                    "Outcome assessment complete - negotiate hard"
                });
                StepOutcome::Ok(assessment)
            }
            Err(e) => {
                warn!(error = %e, "strategy generation failed, using default tactics");
                StepOutcome::fallback(baseline, format!("Outcome assessment error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PricingModel, ValueAssessment};

    fn form(offer: &str, target: &str) -> FormData {
        FormData {
            supplier_name: "Acme".into(),
            supplier_contact: None,
            product_description: "Support plan".into(),
            product_type: ProductType::Service,
            offer_price: offer.into(),
            pricing_model: PricingModel::Monthly,
            max_price: "€2.000,00".into(),
            target_price: target.into(),
            value_assessment: ValueAssessment::MediumImpact,
        }
    }

    #[test]
    fn baseline_uses_defaults_and_rules() {
        let a = assess(&form("€1.500,00", "€1.800,00"), Draft::default());
        assert!(a.target_achievable);
        assert_eq!(a.confidence, "Medium");
        assert_eq!(a.partnership_recommendation, "Preferred Vendor");
        assert_eq!(a.negotiation_leverage.len(), 3);
        assert_eq!(a.recommended_tactics[0], "Highlight offer gaps");
    }

    #[test]
    fn tactics_are_bounded() {
        let draft = Draft {
            negotiation_leverage: (0..8).map(|i| format!("lever {i}")).collect(),
            recommended_tactics: vec!["Anchor low".into()],
        };
        let a = assess(&form("€2.500,00", "€1.800,00"), draft);
        assert!(!a.target_achievable);
        assert_eq!(a.negotiation_leverage.len(), 5);
        assert_eq!(
            a.recommended_tactics,
            vec!["Anchor low", "Request additional concessions", "Request additional concessions"]
        );
    }
}

//! Gap analysis of the supplier offer against the initial request.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest, SearchQuery};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::{Collaborators, OFFER_ANALYSIS, PARSE, require};
use crate::rules::{available, clean_list, completeness_score, or_defaults, research_context, truncate};
use crate::schema::{FormData, OfferAnalysis, ProductType};
use crate::state::BriefingState;

const ANALYSIS_SYSTEM: &str = "You are a contract analysis expert. Compare the supplier's offer against \
the initial request and industry standards. Answer with a JSON object with keys `completeness_score` \
(integer 1-10: how well the offer addresses the request), `completeness_notes` (specific gaps), \
`price_assessment` (offer price vs target price and max price) and `hidden_cost_warnings` (2-4 items). \
Be critical and specific. The offer price is the most the supplier is asking.";

const DOCUMENT_MAX_CHARS: usize = 1500;
const RESULT_MAX_CHARS: usize = 400;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    completeness_score: Value,
    completeness_notes: Option<String>,
    price_assessment: Option<String>,
    hidden_cost_warnings: Vec<String>,
}

pub struct OfferAnalysisStep {
    collaborators: Collaborators,
}

impl OfferAnalysisStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn queries(product_type: ProductType) -> Vec<SearchQuery> {
    vec![
        SearchQuery::new(
            "standards",
            format!("{product_type} standard contract terms industry best practices"),
        )
        .with_system_prompt("Provide typical contract terms and deliverables for this product type."),
        SearchQuery::new("deliverables", format!("{product_type} typical deliverables scope of work"))
            .with_system_prompt("List common deliverables and scope items for this product/service."),
        SearchQuery::new("hidden_costs", format!("{product_type} hidden costs common issues pitfalls"))
            .with_system_prompt("Identify potential hidden costs and common pricing pitfalls."),
    ]
}

fn finish(form: &FormData, draft: Draft) -> OfferAnalysis {
    OfferAnalysis {
        completeness_score: completeness_score(&draft.completeness_score),
        completeness_notes: available(draft.completeness_notes)
            .unwrap_or_else(|| "Unable to assess completeness".into()),
        price_assessment: available(draft.price_assessment).unwrap_or_else(|| {
            format!(
                "Offer price: {}, Target: {}, Max: {}",
                form.offer_price, form.target_price, form.max_price
            )
        }),
        hidden_cost_warnings: or_defaults(
            clean_list(draft.hidden_cost_warnings, 10),
            &[
                "Review all line items carefully",
                "Check for implementation fees",
                "Verify ongoing costs",
            ],
        ),
    }
}

#[async_trait]
impl Step<BriefingState> for OfferAnalysisStep {
    type Output = OfferAnalysis;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(OFFER_ANALYSIS, "offer_analysis")
            .reads([PARSE])
            .weight(2.0)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<OfferAnalysis> {
        &state.offer_analysis
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<OfferAnalysis> {
        ctx.running("Starting offer analysis...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let form = &parsed.form_data;
        info!(offer = %form.offer_price, target = %form.target_price, "analyzing offer");

        ctx.milestone_with_detail(
            "Researching industry standards...",
            format!("Looking up typical {} terms", form.product_type),
            0.2,
        );
        let queries = queries(form.product_type);
        let results = self.collaborators.research.batch_search(&queries).await;
        let context = research_context(&queries, &results, RESULT_MAX_CHARS);
        ctx.milestone("Research complete, analyzing offer...", 0.5);

        let request = LlmRequest::new(
            ANALYSIS_SYSTEM,
            format!(
                "INITIAL REQUEST:\n{}\n\nSUPPLIER OFFER:\n{}\n\nPRICING:\n- Offer price: {} (supplier's ask)\n\
- Target price: {} (our goal)\n- Max price: {} (our ceiling)\n\nINDUSTRY STANDARDS:\n{}",
                truncate(&parsed.initial_request_text, DOCUMENT_MAX_CHARS),
                truncate(&parsed.supplier_offer_text, DOCUMENT_MAX_CHARS),
                form.offer_price,
                form.target_price,
                form.max_price,
                if context.is_empty() { "None available" } else { context.as_str() },
            ),
        )
        .temperature(0.2);
        let draft: Draft = match self.collaborators.llm.invoke_structured(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(error = %e, "offer analysis failed");
                return StepOutcome::fatal(format!("Offer analysis error: {e}"));
            }
        };

        let analysis = finish(form, draft);
        ctx.completed(format!(
            "Offer analysis complete (completeness {}/10)",
            analysis.completeness_score
        ));
        StepOutcome::Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PricingModel, ValueAssessment};
    use serde_json::json;

    fn form() -> FormData {
        FormData {
            supplier_name: "Acme".into(),
            supplier_contact: None,
            product_description: "Rack servers".into(),
            product_type: ProductType::Hardware,
            offer_price: "$50,000".into(),
            pricing_model: PricingModel::OneTime,
            max_price: "$55,000".into(),
            target_price: "$45,000".into(),
            value_assessment: ValueAssessment::MediumImpact,
        }
    }

    #[test]
    fn empty_draft_gets_defaults() {
        let analysis = finish(&form(), Draft::default());
        assert_eq!(analysis.completeness_score, 5);
        assert_eq!(analysis.completeness_notes, "Unable to assess completeness");
        assert_eq!(
            analysis.price_assessment,
            "Offer price: $50,000, Target: $45,000, Max: $55,000"
        );
        assert_eq!(analysis.hidden_cost_warnings.len(), 3);
    }

    #[test]
    fn model_values_are_kept() {
        let draft: Draft = serde_json::from_value(json!({
            "completeness_score": "6 out of 10",
            "completeness_notes": "No SLA",
            "hidden_cost_warnings": ["Shipping not included"]
        }))
        .unwrap();
        let analysis = finish(&form(), draft);
        assert_eq!(analysis.completeness_score, 6);
        assert_eq!(analysis.completeness_notes, "No SLA");
        assert_eq!(analysis.hidden_cost_warnings, vec!["Shipping not included"]);
    }
}

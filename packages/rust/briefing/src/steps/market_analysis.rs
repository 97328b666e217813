//! Market positioning against alternatives and pricing benchmarks.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest, SearchQuery};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::{Collaborators, MARKET_ANALYSIS, PARSE, require};
use crate::rules::{alternatives_listing, available, clean_list, fit_list, or_defaults, research_context};
use crate::schema::{AlternativeSupplier, MarketAnalysis, ProductType};
use crate::state::BriefingState;

const ANALYSIS_SYSTEM: &str = "You are a strategic procurement analyst. Analyze the market data and \
answer with a JSON object with keys `alternatives_overview` (2-3 sentences on the alternative suppliers), \
`price_positioning` (is the offer competitive, premium or budget versus market rates) and `key_risks` \
(exactly 3 risks from supplier research, offer gaps and market position). Be concise and focused on \
negotiation leverage.";

const RESULT_MAX_CHARS: usize = 500;
const MAX_ALTERNATIVE_QUERIES: usize = 3;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    alternatives_overview: Option<String>,
    price_positioning: Option<String>,
    key_risks: Vec<String>,
}

pub struct MarketAnalysisStep {
    collaborators: Collaborators,
}

impl MarketAnalysisStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn queries(
    supplier: &str,
    product_type: ProductType,
    alternatives: &[AlternativeSupplier],
) -> Vec<SearchQuery> {
    let mut queries: Vec<SearchQuery> = alternatives
        .iter()
        .take(MAX_ALTERNATIVE_QUERIES)
        .enumerate()
        .map(|(i, alt)| {
            SearchQuery::new(
                format!("alternative_{i}"),
                format!("\"{}\" vs \"{supplier}\" comparison pricing {product_type}", alt.name),
            )
            .with_system_prompt(
                "Compare these suppliers objectively, focusing on pricing and key differences.",
            )
        })
        .collect();
    queries.push(
        SearchQuery::new(
            "market_position",
            format!("{supplier} market share position {product_type} industry"),
        )
        .with_system_prompt("Analyze this company's market position and reputation."),
    );
    queries.push(
        SearchQuery::new(
            "pricing_benchmarks",
            format!("{product_type} pricing benchmarks industry standard 2025"),
        )
        .with_system_prompt("Provide typical pricing ranges for this product/service type."),
    );
    queries
}

fn finish(draft: Draft) -> MarketAnalysis {
    MarketAnalysis {
        alternatives_overview: available(draft.alternatives_overview)
            .unwrap_or_else(|| "No alternatives analysis available".into()),
        price_positioning: available(draft.price_positioning)
            .unwrap_or_else(|| "Insufficient data for price positioning".into()),
        key_risks: fit_list(
            or_defaults(
                clean_list(draft.key_risks, 3),
                &[
                    "Market data unavailable",
                    "Limited competitive intelligence",
                    "Unable to assess positioning",
                ],
            ),
            3,
            3,
            "Additional market analysis recommended",
        ),
    }
}

#[async_trait]
impl Step<BriefingState> for MarketAnalysisStep {
    type Output = MarketAnalysis;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(MARKET_ANALYSIS, "market_analysis")
            .reads([PARSE])
            .weight(2.0)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<MarketAnalysis> {
        &state.market_analysis
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<MarketAnalysis> {
        ctx.running("Starting market analysis...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let form = &parsed.form_data;
        let supplier = form.supplier_name.as_str();

        ctx.milestone_with_detail(
            "Researching alternatives and pricing...",
            format!("Comparing {supplier} to market"),
            0.2,
        );
        let queries = queries(supplier, form.product_type, &parsed.alternatives);
        let results = self.collaborators.research.batch_search(&queries).await;
        let context = research_context(&queries, &results, RESULT_MAX_CHARS);
        if context.is_empty() {
            info!(supplier, "no market research available, analyzing from inputs only");
        }
        ctx.milestone("Research complete, analyzing data...", 0.5);

        let request = LlmRequest::new(
            ANALYSIS_SYSTEM,
            format!(
                "Supplier: {supplier}\nProduct type: {}\nOffer price: {}\n\nAlternatives:\n{}\n\nMarket research:\n{}",
                form.product_type,
                form.offer_price,
                alternatives_listing(&parsed.alternatives, "N/A"),
                if context.is_empty() { "None available" } else { context.as_str() },
            ),
        )
        .temperature(0.3);
        let draft: Draft = match self.collaborators.llm.invoke_structured(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(supplier, error = %e, "market analysis failed");
                return StepOutcome::fatal(format!("Market analysis error: {e}"));
            }
        };

        let analysis = finish(draft);
        ctx.completed(format!(
            "Market analysis complete ({} alternatives)",
            parsed.alternatives.len()
        ));
        StepOutcome::Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternative_queries_are_capped() {
        let alts: Vec<AlternativeSupplier> = (0..5)
            .map(|i| AlternativeSupplier {
                name: format!("Alt{i}"),
                description: None,
                contact: None,
            })
            .collect();
        let q = queries("Acme", ProductType::Service, &alts);
        assert_eq!(q.len(), 5);
        assert_eq!(q[0].key, "alternative_0");
        assert!(q[0].query.contains("\"Alt0\" vs \"Acme\""));
        assert_eq!(q[4].key, "pricing_benchmarks");
    }

    #[test]
    fn risks_are_exactly_three() {
        let analysis = finish(Draft {
            key_risks: vec!["Vendor lock-in".into()],
            ..Draft::default()
        });
        assert_eq!(
            analysis.key_risks,
            vec![
                "Vendor lock-in",
                "Additional market analysis recommended",
                "Additional market analysis recommended"
            ]
        );

        let analysis = finish(Draft::default());
        assert_eq!(analysis.key_risks[0], "Market data unavailable");
        assert_eq!(analysis.price_positioning, "Insufficient data for price positioning");
    }
}

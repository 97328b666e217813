//! Supplier intelligence: four research queries synthesized into a profile.
//!
//! Non-essential. Research or model failures produce a placeholder profile
//! so the rest of the briefing still runs.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest, SearchQuery};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::{Collaborators, PARSE, SUPPLIER_SUMMARY, require};
use crate::rules::{available, clean_list, first_research_error, fit_list, research_context};
use crate::schema::{CompanyOverview, SupplierSummary};
use crate::state::BriefingState;

const SYNTHESIS_SYSTEM: &str = "You are a business intelligence analyst. Synthesize the research into a \
structured company profile. Answer with a JSON object with keys `description` (2-3 sentences), `size`, \
`location`, `industry`, `key_facts` (exactly 5), `recent_news` (exactly 3) and `contact_info`. \
Be concise and factual; write \"Not available\" instead of guessing.";

const RESULT_MAX_CHARS: usize = 800;
const NO_CONTACT: &str = "Contact information not available";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    description: Option<String>,
    size: Option<String>,
    location: Option<String>,
    industry: Option<String>,
    key_facts: Vec<String>,
    recent_news: Vec<String>,
    contact_info: Option<String>,
}

pub struct SupplierSummaryStep {
    collaborators: Collaborators,
}

impl SupplierSummaryStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn queries(supplier: &str) -> Vec<SearchQuery> {
    vec![
        SearchQuery::new("company_profile", format!("\"{supplier}\" company overview about us"))
            .with_system_prompt(
                "You are a business research assistant. Provide comprehensive company information.",
            ),
        SearchQuery::new("linkedin", format!("{supplier} site:linkedin.com"))
            .with_system_prompt("Extract company size, location, and industry from LinkedIn profile."),
        SearchQuery::new("recent_news", format!("\"{supplier}\" news 2024 OR 2025")).with_system_prompt(
            "Summarize the most recent and relevant news about this company.",
        ),
        SearchQuery::new("contact", format!("{supplier} contact information email phone"))
            .with_system_prompt("Find official contact information for this company."),
    ]
}

/// Fit facts to five and news to three, with placeholders where short.
fn summary(
    supplier: &str,
    overview: CompanyOverview,
    facts: Vec<String>,
    news: Vec<String>,
    contact: String,
) -> SupplierSummary {
    let facts = if facts.is_empty() {
        vec![format!("Supplier: {supplier}")]
    } else {
        facts
    };
    let news = if news.is_empty() {
        vec!["No recent news available".to_string()]
    } else {
        news
    };
    SupplierSummary {
        company_overview: overview,
        key_facts: fit_list(facts, 5, 5, "Additional information not available"),
        recent_news: fit_list(news, 3, 3, "No additional news available"),
        contact_info: contact,
    }
}

fn placeholder(supplier: &str, contact: String) -> SupplierSummary {
    summary(
        supplier,
        CompanyOverview::described(format!("{supplier} - research unavailable")),
        Vec::new(),
        Vec::new(),
        contact,
    )
}

#[async_trait]
impl Step<BriefingState> for SupplierSummaryStep {
    type Output = SupplierSummary;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(SUPPLIER_SUMMARY, "supplier_summary")
            .reads([PARSE])
            .non_essential()
            .weight(2.0)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<SupplierSummary> {
        &state.supplier_summary
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<SupplierSummary> {
        ctx.running("Starting supplier research...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let supplier = parsed.form_data.supplier_name.as_str();
        let given_contact = available(parsed.form_data.supplier_contact.clone());

        ctx.milestone_with_detail(
            "Researching company profile...",
            format!("Searching for {supplier}"),
            0.2,
        );
        let queries = queries(supplier);
        let results = self.collaborators.research.batch_search(&queries).await;
        let context = research_context(&queries, &results, RESULT_MAX_CHARS);
        let fallback_contact = || given_contact.clone().unwrap_or_else(|| NO_CONTACT.into());

        if context.is_empty() {
            let reason = first_research_error(&queries, &results);
            warn!(supplier, %reason, "supplier research returned nothing usable");
            return StepOutcome::fallback(
                placeholder(supplier, fallback_contact()),
                format!("research unavailable: {reason}"),
            );
        }
        ctx.milestone("Research complete, synthesizing profile...", 0.5);

        let request = LlmRequest::new(
            SYNTHESIS_SYSTEM,
            format!(
                "Company name: {supplier}\n\nResearch results:\n{context}\n\nUser-provided contact: {}",
                given_contact.as_deref().unwrap_or("Not provided")
            ),
        )
        .temperature(0.3);
        let draft: Draft = match self.collaborators.llm.invoke_structured(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(supplier, error = %e, "supplier synthesis failed");
                return StepOutcome::fallback(
                    placeholder(supplier, fallback_contact()),
                    format!("Supplier summary error: {e}"),
                );
            }
        };

        let overview = CompanyOverview {
            description: available(draft.description)
                .unwrap_or_else(|| "No description available".into()),
            size: available(draft.size),
            location: available(draft.location),
            industry: available(draft.industry),
        };
        let contact = available(draft.contact_info).unwrap_or_else(fallback_contact);
        let profile = summary(
            supplier,
            overview,
            clean_list(draft.key_facts, 5),
            clean_list(draft.recent_news, 3),
            contact,
        );
        info!(supplier, "supplier profile ready");
        ctx.completed(format!("Supplier research complete for {supplier}"));
        StepOutcome::Ok(profile)
    }
}

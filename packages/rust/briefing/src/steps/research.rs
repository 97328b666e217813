//! Supplier research for the chain topology.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest, SearchQuery};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::{Collaborators, PARSE, RESEARCH, require};
use crate::rules::{available, clean_list, first_research_error, research_context};
use crate::schema::{CompanyOverview, ResearchOutput};
use crate::state::BriefingState;

const AGGREGATION_SYSTEM: &str = "You are a business intelligence analyst. Analyze the web search results \
and create a structured summary of the company. Answer with a JSON object with keys \
`company_overview` (`description`, `size`, `location`, `industry`), `key_facts` (at most 5) and \
`recent_news` (at most 3). Be concise and factual; use null or empty lists when information is missing.";

const CONTEXT_MAX_CHARS: usize = 2000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    company_overview: OverviewDraft,
    key_facts: Vec<String>,
    recent_news: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OverviewDraft {
    description: Option<String>,
    size: Option<String>,
    location: Option<String>,
    industry: Option<String>,
}

pub struct ResearchStep {
    collaborators: Collaborators,
}

impl ResearchStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn unavailable(description: String, contact: Option<String>) -> ResearchOutput {
    ResearchOutput {
        company_overview: CompanyOverview::described(description),
        key_facts: Vec::new(),
        recent_news: Vec::new(),
        contact_info: contact,
    }
}

#[async_trait]
impl Step<BriefingState> for ResearchStep {
    type Output = ResearchOutput;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(RESEARCH, "research").reads([PARSE]).weight(4.5)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<ResearchOutput> {
        &state.research
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<ResearchOutput> {
        ctx.running("Researching supplier...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let supplier = parsed.form_data.supplier_name.trim();
        let contact = parsed.form_data.supplier_contact.clone();

        if supplier.is_empty() || supplier.eq_ignore_ascii_case("unknown") {
            info!("no supplier name, skipping research");
            ctx.completed("Skipped research - no supplier information");
            return StepOutcome::Ok(unavailable(
                "No supplier information available".into(),
                contact,
            ));
        }

        let queries = [
            SearchQuery::new(
                "company_info",
                format!("{supplier} company information business profile size location"),
            ),
            SearchQuery::new("news", format!("{supplier} recent news 2024 2025")),
        ];
        let results = self.collaborators.research.batch_search(&queries).await;
        let context = research_context(&queries, &results, CONTEXT_MAX_CHARS);
        let fallback = || unavailable(format!("{supplier} - research unavailable"), contact.clone());

        if context.is_empty() {
            let reason = first_research_error(&queries, &results);
            warn!(supplier, %reason, "web research returned nothing usable");
            return StepOutcome::fallback(fallback(), format!("research unavailable: {reason}"));
        }
        ctx.milestone("Search complete, summarizing...", 0.5);

        let request = LlmRequest::new(
            AGGREGATION_SYSTEM,
            format!("Web search results for {supplier}:\n\n{context}\n\nCreate a structured summary of this company."),
        )
        .temperature(0.3);
        let draft: Draft = match self.collaborators.llm.invoke_structured(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(supplier, error = %e, "research aggregation failed");
                return StepOutcome::fallback(fallback(), format!("Research error: {e}"));
            }
        };

        let overview = draft.company_overview;
        let output = ResearchOutput {
            company_overview: CompanyOverview {
                description: available(overview.description)
                    .unwrap_or_else(|| format!("{supplier} - no description available")),
                size: available(overview.size),
                location: available(overview.location),
                industry: available(overview.industry),
            },
            key_facts: clean_list(draft.key_facts, 5),
            recent_news: clean_list(draft.recent_news, 3),
            contact_info: contact,
        };
        ctx.completed(format!("Research completed for {supplier}"));
        StepOutcome::Ok(output)
    }
}

//! Five prioritized actions drawn from every earlier analysis.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModelExt, LlmRequest};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};

use super::analyze::ActionDraft;
use super::{
    ACTION_ITEMS, Collaborators, MARKET_ANALYSIS, OFFER_ANALYSIS, OUTCOME_ASSESSMENT, PARSE,
    require,
};
use crate::rules::{bullet_list, fit_action_items, truncate};
use crate::schema::{ActionItem, ActionItems};
use crate::state::BriefingState;

const PLANNING_SYSTEM: &str = "You are a procurement action planning expert. Generate exactly 5 of the \
most important action items based on the gap analysis. Each must be specific and actionable, address gaps \
between request and offer, and be ordered by impact. Answer with a JSON object {\"action_items\": [...]} \
whose entries have `category` (price, terms, timeline or scope), `action` and `recommended` (true for \
exactly 2).";

const ACTION_COUNT: usize = 5;
const RESEARCH_MAX_CHARS: usize = 800;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Draft {
    action_items: Vec<ActionDraft>,
}

pub struct ActionItemsStep {
    collaborators: Collaborators,
}

impl ActionItemsStep {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl Step<BriefingState> for ActionItemsStep {
    type Output = ActionItems;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(ACTION_ITEMS, "action_items")
            .reads([PARSE, OFFER_ANALYSIS, MARKET_ANALYSIS, OUTCOME_ASSESSMENT])
            .weight(1.5)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<ActionItems> {
        &state.action_items
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<ActionItems> {
        ctx.running("Generating action items...").await;
        let parsed = require!(ctx.dependency(PARSE, |s| &s.parsed_input));
        let offer = require!(ctx.dependency(OFFER_ANALYSIS, |s| &s.offer_analysis));
        let market = require!(ctx.dependency(MARKET_ANALYSIS, |s| &s.market_analysis));
        let outcome = require!(ctx.dependency(OUTCOME_ASSESSMENT, |s| &s.outcome_assessment));
        let form = &parsed.form_data;

        ctx.milestone_with_detail(
            "Researching best practices...",
            format!("Looking up {} negotiation checklists", form.product_type),
            0.2,
        );
        let research = self
            .collaborators
            .research
            .search(
                &format!(
                    "contract negotiation action items checklist {} procurement",
                    form.product_type
                ),
                "Provide a checklist of important action items for contract negotiations.",
            )
            .await;
        let practices = research.usable().map(|c| truncate(c, RESEARCH_MAX_CHARS)).unwrap_or("");
        ctx.milestone("Research complete, generating items...", 0.5);

        let request = LlmRequest::new(
            PLANNING_SYSTEM,
            format!(
                "Supplier: {}\nProduct type: {}\n\nOffer completeness: {}/10\nGaps: {}\n\n\
Hidden cost warnings:\n{}\n\nKey risks:\n{}\n\nTarget achievable: {}\n\nBest practices research:\n{}",
                form.supplier_name,
                form.product_type,
                offer.completeness_score,
                offer.completeness_notes,
                bullet_list(&offer.hidden_cost_warnings),
                bullet_list(&market.key_risks),
                if outcome.target_achievable { "Yes" } else { "No" },
                if practices.is_empty() { "None available" } else { practices },
            ),
        )
        .temperature(0.5);
        let draft: Draft = match self.collaborators.llm.invoke_structured(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(error = %e, "action item generation failed");
                return StepOutcome::fatal(format!("Action items error: {e}"));
            }
        };

        let items = fit_action_items(
            draft.action_items.into_iter().map(ActionItem::from).collect(),
            ACTION_COUNT,
            ACTION_COUNT,
        );
        info!(count = items.len(), "action items ready");
        ctx.completed(format!("{ACTION_COUNT} priority actions identified"));
        StepOutcome::Ok(ActionItems { items })
    }
}

//! The briefing steps. Each one owns a single output slot of
//! [`BriefingState`](crate::state::BriefingState).

use std::sync::Arc;

use briefwise_collaborators::{LanguageModel, WebResearch};

/// Unwrap a dependency read or return its error as the step outcome.
macro_rules! require {
    ($read:expr) => {
        match $read {
            Ok(value) => value,
            Err(e) => return e.into(),
        }
    };
}
pub(crate) use require;

mod action_items;
mod analyze;
mod market_analysis;
mod offer_analysis;
mod outcome_assessment;
mod parse;
mod research;
mod supplier_summary;

pub use action_items::ActionItemsStep;
pub use analyze::AnalyzeStep;
pub use market_analysis::MarketAnalysisStep;
pub use offer_analysis::OfferAnalysisStep;
pub use outcome_assessment::OutcomeAssessmentStep;
pub use parse::ParseStep;
pub use research::ResearchStep;
pub use supplier_summary::SupplierSummaryStep;

pub const PARSE: &str = "parse";
pub const RESEARCH: &str = "research";
pub const ANALYZE: &str = "analyze";
pub const SUPPLIER_SUMMARY: &str = "supplier_summary";
pub const MARKET_ANALYSIS: &str = "market_analysis";
pub const OFFER_ANALYSIS: &str = "offer_analysis";
pub const OUTCOME_ASSESSMENT: &str = "outcome_assessment";
pub const ACTION_ITEMS: &str = "action_items";

/// The external services steps call.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LanguageModel>,
    pub research: Arc<dyn WebResearch>,
}

impl Collaborators {
    pub fn new(llm: Arc<dyn LanguageModel>, research: Arc<dyn WebResearch>) -> Self {
        Self { llm, research }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

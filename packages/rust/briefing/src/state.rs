use serde::Serialize;

use briefwise_engine::{JobState, Slot};

use crate::schema::{
    ActionItems, BriefingInputs, FinalBriefing, MarketAnalysis, OfferAnalysis, OutcomeAssessment,
    ParsedInput, ResearchOutput, SupplierSummary,
};

/// Output slots of a briefing job. Each topology fills a subset; the rest
/// serialize as `null`.
#[derive(Debug, Default, Serialize)]
pub struct BriefingState {
    pub parsed_input: Slot<ParsedInput>,
    // chain
    pub research: Slot<ResearchOutput>,
    pub final_briefing: Slot<FinalBriefing>,
    // tiered
    pub supplier_summary: Slot<SupplierSummary>,
    pub market_analysis: Slot<MarketAnalysis>,
    pub offer_analysis: Slot<OfferAnalysis>,
    pub outcome_assessment: Slot<OutcomeAssessment>,
    pub action_items: Slot<ActionItems>,
}

impl JobState for BriefingState {
    type Inputs = BriefingInputs;
}

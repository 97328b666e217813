//! The two pipeline shapes a deployment can choose between.
//!
//! ```text
//! chain:   parse -> research -> analyze
//!
//! tiered:           +-> supplier_summary
//!          parse ---+-> market_analysis ---+-> outcome_assessment -> action_items
//!                   +-> offer_analysis ----+
//! ```

use briefwise_engine::{ExecutionMode, Pipeline};
use briefwise_shared::{Result, Topology};

use crate::state::BriefingState;
use crate::steps::{
    ActionItemsStep, AnalyzeStep, Collaborators, MarketAnalysisStep, OfferAnalysisStep,
    OutcomeAssessmentStep, ParseStep, ResearchStep, SupplierSummaryStep,
};

/// Sequential pipeline; the first error stops everything after it.
pub fn chain_pipeline(collaborators: &Collaborators) -> Result<Pipeline<BriefingState>> {
    Pipeline::builder(ExecutionMode::StrictChain)
        .step(ParseStep::new(collaborators.llm.clone()))
        .step(ResearchStep::new(collaborators.clone()))
        .step(AnalyzeStep::new(collaborators.clone()))
        .build()
}

/// Fan-out/fan-in pipeline; independent branches survive each other's
/// failures.
pub fn tiered_pipeline(collaborators: &Collaborators) -> Result<Pipeline<BriefingState>> {
    Pipeline::builder(ExecutionMode::Tiered)
        .step(ParseStep::new(collaborators.llm.clone()))
        .step(SupplierSummaryStep::new(collaborators.clone()))
        .step(MarketAnalysisStep::new(collaborators.clone()))
        .step(OfferAnalysisStep::new(collaborators.clone()))
        .step(OutcomeAssessmentStep::new(collaborators.clone()))
        .step(ActionItemsStep::new(collaborators.clone()))
        .build()
}

pub fn build_pipeline(
    topology: Topology,
    collaborators: &Collaborators,
) -> Result<Pipeline<BriefingState>> {
    match topology {
        Topology::Chain => chain_pipeline(collaborators),
        Topology::Tiered => tiered_pipeline(collaborators),
    }
}

//! Negotiation briefings for procurement teams.
//!
//! A briefing job validates the submitted documents and form, researches the
//! supplier and market, and asks the language model for the analyses a buyer
//! needs before a negotiation. Two pipeline shapes are available, see
//! [`topology`].

pub mod rules;
pub mod schema;
pub mod service;
pub mod state;
pub mod steps;
pub mod topology;

pub use schema::{
    ActionCategory, ActionItem, ActionItems, AlternativeSupplier, BriefingInputs,
    CompanyOverview, FinalBriefing, FormData, MarketAnalysis, OfferAnalysis, OutcomeAssessment,
    ParsedInput, PricingModel, ProductType, ResearchOutput, SupplierSummary, ValueAssessment,
};
pub use service::{BriefingOptions, BriefingService};
pub use state::BriefingState;
pub use steps::Collaborators;
pub use topology::{build_pipeline, chain_pipeline, tiered_pipeline};

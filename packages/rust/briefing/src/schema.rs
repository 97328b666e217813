//! Inputs and step outputs of the briefing pipeline.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Job inputs
// ---------------------------------------------------------------------------

/// Documents and form fields supplied when a briefing job is created.
///
/// Text fields that are empty or whitespace count as missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BriefingInputs {
    pub document_id: String,
    #[serde(default)]
    pub supplier_offer_text: String,
    #[serde(default)]
    pub initial_request_text: String,
    #[serde(default)]
    pub alternatives_text: Option<String>,
    #[serde(default)]
    pub additional_context: Option<String>,
    /// Raw form payload, validated into [`FormData`] by the parse step.
    #[serde(default)]
    pub form_data: Option<serde_json::Value>,
}

impl BriefingInputs {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Self::default()
        }
    }

    pub fn supplier_offer(mut self, text: impl Into<String>) -> Self {
        self.supplier_offer_text = text.into();
        self
    }

    pub fn initial_request(mut self, text: impl Into<String>) -> Self {
        self.initial_request_text = text.into();
        self
    }

    pub fn alternatives(mut self, text: impl Into<String>) -> Self {
        self.alternatives_text = Some(text.into());
        self
    }

    pub fn additional_context(mut self, text: impl Into<String>) -> Self {
        self.additional_context = Some(text.into());
        self
    }

    pub fn form(mut self, form: serde_json::Value) -> Self {
        self.form_data = Some(form);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Software,
    Hardware,
    Service,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Hardware => "hardware",
            Self::Service => "service",
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingModel {
    #[serde(rename = "yearly")]
    Yearly,
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "one-time")]
    OneTime,
}

impl PricingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yearly => "yearly",
            Self::Monthly => "monthly",
            Self::OneTime => "one-time",
        }
    }
}

/// How much the purchase matters to the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueAssessment {
    Urgent,
    HighImpact,
    MediumImpact,
    LowImpact,
}

impl ValueAssessment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::HighImpact => "high_impact",
            Self::MediumImpact => "medium_impact",
            Self::LowImpact => "low_impact",
        }
    }
}

/// The negotiation context entered by the buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormData {
    pub supplier_name: String,
    #[serde(default)]
    pub supplier_contact: Option<String>,
    pub product_description: String,
    pub product_type: ProductType,
    pub offer_price: String,
    pub pricing_model: PricingModel,
    pub max_price: String,
    pub target_price: String,
    pub value_assessment: ValueAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeSupplier {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

/// Validated inputs, written by `parse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInput {
    pub supplier_offer_text: String,
    pub initial_request_text: String,
    #[serde(default)]
    pub alternatives_text: Option<String>,
    #[serde(default)]
    pub alternatives: Vec<AlternativeSupplier>,
    pub form_data: FormData,
    #[serde(default)]
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyOverview {
    pub description: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

impl CompanyOverview {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

/// Web-sourced supplier profile, written by `research`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub company_overview: CompanyOverview,
    /// At most five.
    pub key_facts: Vec<String>,
    /// At most three.
    pub recent_news: Vec<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierSummary {
    pub company_overview: CompanyOverview,
    pub key_facts: Vec<String>,
    pub recent_news: Vec<String>,
    pub contact_info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub alternatives_overview: String,
    pub price_positioning: String,
    /// At most three.
    pub key_risks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferAnalysis {
    /// Always within `1..=10`.
    pub completeness_score: u8,
    pub completeness_notes: String,
    pub price_assessment: String,
    pub hidden_cost_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAssessment {
    pub target_achievable: bool,
    /// `High`, `Medium` or `Low`.
    pub confidence: String,
    pub negotiation_leverage: Vec<String>,
    /// Between three and five entries.
    pub recommended_tactics: Vec<String>,
    pub partnership_recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Price,
    Terms,
    Timeline,
    Scope,
}

impl ActionCategory {
    /// Lenient mapping from model output; unknown labels become `Terms`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "price" | "pricing" => Self::Price,
            "timeline" | "schedule" => Self::Timeline,
            "scope" => Self::Scope,
            _ => Self::Terms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub category: ActionCategory,
    pub action: String,
    #[serde(default)]
    pub recommended: bool,
}

/// Prioritised actions, written by `action_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItems {
    pub items: Vec<ActionItem>,
}

/// The complete briefing produced by the chain topology's `analyze` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalBriefing {
    pub supplier_summary: SupplierSummary,
    pub market_analysis: MarketAnalysis,
    pub offer_analysis: OfferAnalysis,
    pub outcome_assessment: OutcomeAssessment,
    /// Five to ten items, exactly two recommended.
    pub action_items: Vec<ActionItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn form_data_uses_wire_labels() {
        let form: FormData = serde_json::from_value(json!({
            "supplier_name": "Acme",
            "product_description": "CRM seats",
            "product_type": "software",
            "offer_price": "$10,000",
            "pricing_model": "one-time",
            "max_price": "$12,000",
            "target_price": "$9,000",
            "value_assessment": "high_impact"
        }))
        .unwrap();

        assert_eq!(form.pricing_model, PricingModel::OneTime);
        assert_eq!(form.value_assessment, ValueAssessment::HighImpact);
        assert!(form.supplier_contact.is_none());
    }

    #[test]
    fn unknown_product_type_is_rejected() {
        let err = serde_json::from_value::<FormData>(json!({
            "supplier_name": "Acme",
            "product_description": "x",
            "product_type": "consulting",
            "offer_price": "1",
            "pricing_model": "yearly",
            "max_price": "1",
            "target_price": "1",
            "value_assessment": "urgent"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("consulting"));
    }

    #[test]
    fn action_category_is_lenient() {
        assert_eq!(ActionCategory::from_label("Price"), ActionCategory::Price);
        assert_eq!(ActionCategory::from_label(" timeline "), ActionCategory::Timeline);
        assert_eq!(ActionCategory::from_label("legal"), ActionCategory::Terms);
    }
}

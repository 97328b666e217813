//! Validates job inputs and extracts alternative suppliers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use briefwise_collaborators::{LanguageModel, LanguageModelExt, LlmRequest};
use briefwise_engine::{Slot, Step, StepContext, StepDescriptor, StepOutcome};
use briefwise_shared::{BriefwiseError, Result};

use super::PARSE;
use crate::rules::truncate;
use crate::schema::{AlternativeSupplier, BriefingInputs, FormData, ParsedInput};
use crate::state::BriefingState;

const ALTERNATIVES_SYSTEM: &str = "You are an expert at extracting structured information from documents. \
Extract the list of alternative suppliers from the provided text. For each supplier give \
`name` (required), `description` (what they offer) and `contact` (email, phone or website). \
Answer with a JSON object {\"alternatives\": [...]}; use an empty list if the document names no suppliers.";

const ALTERNATIVES_MAX_CHARS: usize = 4000;

pub struct ParseStep {
    llm: Arc<dyn LanguageModel>,
}

impl ParseStep {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    async fn extract_alternatives(&self, text: &str) -> Result<Vec<AlternativeSupplier>> {
        #[derive(Deserialize)]
        struct Extracted {
            #[serde(default)]
            alternatives: Vec<AlternativeSupplier>,
        }

        let request = LlmRequest::new(
            ALTERNATIVES_SYSTEM,
            format!("Document text:\n\n{}", truncate(text, ALTERNATIVES_MAX_CHARS)),
        )
        .temperature(0.0);
        let extracted: Extracted = self.llm.invoke_structured(&request).await?;
        Ok(extracted
            .alternatives
            .into_iter()
            .filter(|alt| !alt.name.trim().is_empty())
            .collect())
    }
}

/// Check required inputs in order, returning the first problem.
pub(crate) fn validate(inputs: &BriefingInputs) -> Result<FormData> {
    if inputs.supplier_offer_text.trim().is_empty() {
        return Err(BriefwiseError::validation("Missing supplier offer PDF text"));
    }
    if inputs.initial_request_text.trim().is_empty() {
        return Err(BriefwiseError::validation("Missing initial request PDF text"));
    }
    let form = match &inputs.form_data {
        None | Some(serde_json::Value::Null) => {
            return Err(BriefwiseError::validation("Missing form data"));
        }
        Some(serde_json::Value::Object(map)) if map.is_empty() => {
            return Err(BriefwiseError::validation("Missing form data"));
        }
        Some(form) => form,
    };
    FormData::deserialize(form)
        .map_err(|e| BriefwiseError::validation(format!("Invalid form data: {e}")))
}

#[async_trait]
impl Step<BriefingState> for ParseStep {
    type Output = ParsedInput;

    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(PARSE, "parsed_input").weight(1.5)
    }

    fn slot<'a>(&self, state: &'a BriefingState) -> &'a Slot<ParsedInput> {
        &state.parsed_input
    }

    async fn run(&self, ctx: &StepContext<BriefingState>) -> StepOutcome<ParsedInput> {
        ctx.running("Starting input validation...").await;
        let inputs = ctx.inputs();

        let form_data = match validate(inputs) {
            Ok(form) => form,
            Err(e) => {
                warn!(job_id = %ctx.job_id(), error = %e, "input validation failed");
                return StepOutcome::fatal(e.to_string());
            }
        };
        ctx.milestone_with_detail(
            "Validation complete",
            format!("Processing supplier: {}", form_data.supplier_name),
            0.4,
        );

        let mut fallback = None;
        let alternatives = match inputs.alternatives_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                ctx.milestone("Analyzing alternatives document...", 0.6);
                match self.extract_alternatives(text).await {
                    Ok(found) => {
                        info!(count = found.len(), "extracted alternative suppliers");
                        ctx.milestone(format!("Found {} alternative suppliers", found.len()), 0.8);
                        found
                    }
                    Err(e) => {
                        warn!(error = %e, "alternatives extraction failed");
                        fallback = Some(format!("alternatives extraction failed: {e}"));
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let supplier = form_data.supplier_name.clone();
        let parsed = ParsedInput {
            supplier_offer_text: inputs.supplier_offer_text.clone(),
            initial_request_text: inputs.initial_request_text.clone(),
            alternatives_text: inputs.alternatives_text.clone(),
            alternatives,
            form_data,
            additional_context: inputs.additional_context.clone(),
        };

        match fallback {
            Some(reason) => StepOutcome::fallback(parsed, reason),
            None => {
                ctx.completed(format!("Input validation & parsing complete for {supplier}"));
                StepOutcome::Ok(parsed)
            }
        }
    }
}

use std::collections::BTreeMap;

use brandgov_contracts::brand::{BrandGuidelines, ColorUsage, CompressedDigitalTwin, RawGuideline};
use brandgov_contracts::events::EventWriter;
use brandgov_contracts::store::{keys, save, ObjectStore};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::color_mapper::map_colors;
use crate::compressor::Compressor;
use crate::error::IngestionError;
use crate::map_object;

pub const INGESTION_COMPLETED_EVENT: &str = "ingestion_completed";

const DONT_PREFIXES: &[&str] = &["don't", "dont", "do not", "never", "avoid", "no "];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionReport {
    pub brand_id: String,
    pub color_count: usize,
    pub role_counts: BTreeMap<String, usize>,
    pub font_count: usize,
    pub twin_tokens: u64,
    pub twin: CompressedDigitalTwin,
}

/// Maps, compresses and stores one brand. Nothing is written unless the twin
/// fits the budget, so a failed re-ingestion leaves the previous pair intact.
pub fn ingest(
    store: &dyn ObjectStore,
    compressor: &Compressor,
    events: Option<&EventWriter>,
    brand_id: &str,
    raw: RawGuideline,
) -> Result<IngestionReport, IngestionError> {
    let brand_id = brand_id.trim();
    if brand_id.is_empty() {
        return Err(IngestionError::EmptyBrandId);
    }

    let guidelines = build_guidelines(brand_id, raw);
    let twin = compressor.compress(&guidelines)?;
    let twin_tokens = twin.estimate_tokens();

    save(store, &keys::guidelines(brand_id), &guidelines)?;
    save(store, &keys::twin(brand_id), &twin)?;

    let role_counts: BTreeMap<String, usize> = ColorUsage::ALL
        .iter()
        .map(|usage| (usage.as_str().to_string(), guidelines.colors_for(*usage).count()))
        .collect();

    info!(
        brand_id,
        colors = guidelines.colors.len(),
        fonts = guidelines.fonts.len(),
        twin_tokens,
        "brand ingested"
    );
    if let Some(events) = events {
        events.record_quietly(
            INGESTION_COMPLETED_EVENT,
            &map_object(json!({
                "brand_id": brand_id,
                "colors": guidelines.colors.len(),
                "role_counts": role_counts,
                "twin_tokens": twin_tokens,
                "token_ceiling": compressor.budget().max_tokens,
            })),
        );
    }

    Ok(IngestionReport {
        brand_id: brand_id.to_string(),
        color_count: guidelines.colors.len(),
        role_counts,
        font_count: guidelines.fonts.len(),
        twin_tokens,
        twin,
    })
}

pub fn build_guidelines(brand_id: &str, raw: RawGuideline) -> BrandGuidelines {
    let (visual_dos, visual_donts) = split_rules(&raw.rules_text);
    BrandGuidelines {
        brand_id: brand_id.to_string(),
        colors: map_colors(&raw.colors),
        fonts: raw
            .fonts
            .into_iter()
            .map(|font| font.into_family())
            .filter(|font| !font.family.trim().is_empty())
            .collect(),
        visual_dos,
        visual_donts,
        logo_rules: raw.logo_rules,
    }
}

/// Sorts free-text rules into dos and don'ts. Each entry may hold several
/// lines; list markers are stripped.
pub fn split_rules(rules_text: &[String]) -> (Vec<String>, Vec<String>) {
    let mut dos = Vec::new();
    let mut donts = Vec::new();
    for line in rules_text.iter().flat_map(|entry| entry.lines()) {
        let rule = strip_list_marker(line);
        if rule.is_empty() {
            continue;
        }
        let lowered = rule.to_lowercase();
        if DONT_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
            donts.push(rule.to_string());
        } else if lowered.starts_with("do:") {
            let stripped = rule.get(3..).map(str::trim).unwrap_or_default();
            if !stripped.is_empty() {
                dos.push(stripped.to_string());
            }
        } else {
            dos.push(rule.to_string());
        }
    }
    (dos, donts)
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();
    let without_bullet = trimmed
        .strip_prefix(&['-', '*', '•'][..])
        .map(str::trim_start)
        .unwrap_or(trimmed);
    let digits = without_bullet
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .count();
    if digits > 0 {
        let rest = &without_bullet[digits..];
        if let Some(rest) = rest.strip_prefix(&['.', ')'][..]) {
            return rest.trim_start();
        }
    }
    without_bullet
}

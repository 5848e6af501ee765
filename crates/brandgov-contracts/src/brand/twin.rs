use serde::{Deserialize, Serialize};

use super::ColorUsage;

/// Token-budgeted view of a brand's guidelines, used only to steer image
/// generation. Audits always work from the full `BrandGuidelines`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressedDigitalTwin {
    pub primary_colors: Vec<String>,
    pub secondary_colors: Vec<String>,
    pub accent_colors: Vec<String>,
    pub neutral_colors: Vec<String>,
    pub semantic_colors: Vec<String>,
    pub font_families: Vec<String>,
    pub visual_dos: Vec<String>,
    pub visual_donts: Vec<String>,
    pub logo_placement: Option<String>,
    pub logo_min_size: Option<String>,
}

impl CompressedDigitalTwin {
    pub fn colors(&self, usage: ColorUsage) -> &[String] {
        match usage {
            ColorUsage::Primary => &self.primary_colors,
            ColorUsage::Secondary => &self.secondary_colors,
            ColorUsage::Accent => &self.accent_colors,
            ColorUsage::Neutral => &self.neutral_colors,
            ColorUsage::Semantic => &self.semantic_colors,
        }
    }

    pub fn colors_mut(&mut self, usage: ColorUsage) -> &mut Vec<String> {
        match usage {
            ColorUsage::Primary => &mut self.primary_colors,
            ColorUsage::Secondary => &mut self.secondary_colors,
            ColorUsage::Accent => &mut self.accent_colors,
            ColorUsage::Neutral => &mut self.neutral_colors,
            ColorUsage::Semantic => &mut self.semantic_colors,
        }
    }

    /// Compact JSON form. This is both what gets injected into generation
    /// calls and what the token budget is measured against.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn estimate_tokens(&self) -> u64 {
        estimate_text_tokens(&self.to_json_string())
    }
}

/// Deterministic token approximation: one token per four characters.
pub fn estimate_text_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorUsage {
    Primary,
    Secondary,
    Accent,
    Neutral,
    Semantic,
}

impl ColorUsage {
    pub const ALL: [ColorUsage; 5] = [
        ColorUsage::Primary,
        ColorUsage::Secondary,
        ColorUsage::Accent,
        ColorUsage::Neutral,
        ColorUsage::Semantic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorUsage::Primary => "primary",
            ColorUsage::Secondary => "secondary",
            ColorUsage::Accent => "accent",
            ColorUsage::Neutral => "neutral",
            ColorUsage::Semantic => "semantic",
        }
    }
}

/// A brand color after role classification.
///
/// `usage_weight` estimates the share of surface area the color covers in the
/// source material. Weights of one role do not need to sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub name: String,
    pub hex: String,
    pub usage: ColorUsage,
    pub usage_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Color {
    pub fn new(
        name: impl Into<String>,
        hex: impl Into<String>,
        usage: ColorUsage,
        usage_weight: f64,
    ) -> Self {
        Self {
            name: name.into(),
            hex: hex.into(),
            usage,
            usage_weight: clamp_weight(usage_weight),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|value| !value.trim().is_empty());
        self
    }
}

fn clamp_weight(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontFamily {
    pub family: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogoRules {
    #[serde(default)]
    pub placement: Option<String>,
    #[serde(default)]
    pub min_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_space: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misuse: Vec<String>,
}

/// The full ruleset extracted for one brand. Stored once per ingestion and
/// never edited in place; re-ingestion replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandGuidelines {
    pub brand_id: String,
    pub colors: Vec<Color>,
    pub fonts: Vec<FontFamily>,
    #[serde(default)]
    pub visual_dos: Vec<String>,
    #[serde(default)]
    pub visual_donts: Vec<String>,
    #[serde(default)]
    pub logo_rules: LogoRules,
}

impl BrandGuidelines {
    pub fn colors_for(&self, usage: ColorUsage) -> impl Iterator<Item = &Color> {
        self.colors.iter().filter(move |color| color.usage == usage)
    }
}

/// Guideline payload as handed over by the document parser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawGuideline {
    #[serde(default)]
    pub colors: Vec<RawColor>,
    #[serde(default)]
    pub fonts: Vec<RawFont>,
    #[serde(default)]
    pub rules_text: Vec<String>,
    #[serde(default)]
    pub logo_rules: LogoRules,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawColor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hex: String,
    /// Explicit label next to the swatch, e.g. "Primary" or "CTA".
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    /// Surface-area hint in `[0, 1]` when the parser could measure one.
    #[serde(default)]
    pub coverage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFont {
    Name(String),
    Detailed(FontFamily),
}

impl RawFont {
    pub fn into_family(self) -> FontFamily {
        match self {
            RawFont::Name(family) => FontFamily {
                family,
                weights: Vec::new(),
                usage: None,
            },
            RawFont::Detailed(family) => family,
        }
    }
}

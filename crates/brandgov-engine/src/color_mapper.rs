//! Role inference for raw brand colors.
//!
//! Rules are applied in a fixed order: call-to-action terms, role trigger
//! terms, achromatic detection, then the surface-area hint. Anything left
//! over becomes `secondary` with zero weight.

use brandgov_contracts::brand::{Color, ColorUsage, RawColor};

const CTA_TERMS: &[&str] = &["cta", "call to action", "button", "link"];

/// Ordered by implied surface coverage, largest first. When a color matches
/// several roles the earliest entry wins.
const ROLE_TRIGGERS: &[(ColorUsage, &[&str])] = &[
    (
        ColorUsage::Neutral,
        &[
            "background",
            "backdrop",
            "surface",
            "neutral",
            "gray",
            "grey",
            "text",
            "body copy",
            "canvas",
        ],
    ),
    (ColorUsage::Primary, &["primary", "brand", "main", "hero"]),
    (
        ColorUsage::Secondary,
        &["secondary", "supporting", "complementary"],
    ),
    (
        ColorUsage::Semantic,
        &["success", "error", "warning", "danger", "alert", "info", "status"],
    ),
    (ColorUsage::Accent, &["accent", "highlight"]),
];

const LARGE_SURFACE: f64 = 0.30;
const SMALL_SURFACE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingRule {
    CallToAction,
    TriggerTerm,
    Achromatic,
    SurfaceArea,
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub usage: ColorUsage,
    pub rule: MappingRule,
    pub surface_hint: Option<f64>,
}

pub fn map_colors(raw: &[RawColor]) -> Vec<Color> {
    raw.iter().map(map_color).collect()
}

pub fn map_color(raw: &RawColor) -> Color {
    let classification = classify(raw);
    let hex = normalize_hex(&raw.hex).unwrap_or_else(|| raw.hex.trim().to_ascii_uppercase());
    let name = if raw.name.trim().is_empty() {
        hex.clone()
    } else {
        raw.name.trim().to_string()
    };
    let weight = match classification.rule {
        MappingRule::Unclassified => 0.0,
        _ => classification
            .surface_hint
            .unwrap_or_else(|| default_weight(classification.usage)),
    };
    let context = raw
        .context
        .clone()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| raw.label.clone());
    Color::new(name, hex, classification.usage, weight).with_context(context)
}

pub fn classify(raw: &RawColor) -> Classification {
    let text = [
        raw.name.as_str(),
        raw.label.as_deref().unwrap_or_default(),
        raw.context.as_deref().unwrap_or_default(),
    ]
    .join(" ");
    let words = tokenize(&text);
    let surface_hint = raw
        .coverage
        .filter(|value| value.is_finite())
        .or_else(|| percent_hint(&text))
        .map(|value| value.clamp(0.0, 1.0));
    let classified = |usage, rule| Classification {
        usage,
        rule,
        surface_hint,
    };

    if CTA_TERMS.iter().any(|term| contains_term(&words, term)) {
        return classified(ColorUsage::Accent, MappingRule::CallToAction);
    }

    if let Some((usage, _)) = ROLE_TRIGGERS
        .iter()
        .find(|(_, terms)| terms.iter().any(|term| contains_term(&words, term)))
    {
        return classified(*usage, MappingRule::TriggerTerm);
    }

    if normalize_hex(&raw.hex)
        .and_then(|hex| parse_rgb(&hex))
        .map(is_achromatic)
        .unwrap_or(false)
    {
        return classified(ColorUsage::Neutral, MappingRule::Achromatic);
    }

    match surface_hint {
        Some(hint) if hint >= LARGE_SURFACE => classified(ColorUsage::Primary, MappingRule::SurfaceArea),
        Some(hint) if hint > 0.0 && hint < SMALL_SURFACE => {
            classified(ColorUsage::Accent, MappingRule::SurfaceArea)
        }
        Some(_) => classified(ColorUsage::Secondary, MappingRule::SurfaceArea),
        None => classified(ColorUsage::Secondary, MappingRule::Unclassified),
    }
}

fn default_weight(usage: ColorUsage) -> f64 {
    match usage {
        ColorUsage::Neutral => 0.6,
        ColorUsage::Primary => 0.3,
        ColorUsage::Secondary => 0.1,
        ColorUsage::Accent => 0.05,
        ColorUsage::Semantic => 0.02,
    }
}

/// `#abc`, `abc`, `#a1b2c3` and `a1b2c3` normalize to `#RRGGBB`.
pub fn normalize_hex(raw: &str) -> Option<String> {
    let digits = raw.trim().trim_start_matches('#');
    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    let expanded = match digits.len() {
        3 => digits.chars().flat_map(|ch| [ch, ch]).collect::<String>(),
        6 => digits.to_string(),
        _ => return None,
    };
    Some(format!("#{}", expanded.to_ascii_uppercase()))
}

fn parse_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn is_achromatic((r, g, b): (u8, u8, u8)) -> bool {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let lightness = (max + min) / 2.0;
    if lightness > 0.95 || lightness < 0.06 {
        return true;
    }
    let delta = max - min;
    if delta == 0.0 {
        return true;
    }
    let saturation = delta / (1.0 - (2.0 * lightness - 1.0).abs());
    saturation < 0.12
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whole-word match, tolerating a plural `s` on the last word.
fn contains_term(words: &[String], term: &str) -> bool {
    let needle = tokenize(term);
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words.windows(needle.len()).any(|window| {
        window.iter().zip(&needle).enumerate().all(|(idx, (word, want))| {
            word == want || (idx + 1 == needle.len() && word.strip_suffix('s') == Some(want.as_str()))
        })
    })
}

/// First `NN%` or `NN.N%` in the text, as a fraction.
fn percent_hint(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    for (idx, ch) in chars.iter().enumerate() {
        if *ch != '%' {
            continue;
        }
        let start = chars[..idx]
            .iter()
            .rposition(|c| !(c.is_ascii_digit() || *c == '.'))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let number: String = chars[start..idx].iter().collect();
        if let Ok(value) = number.parse::<f64>() {
            return Some(value / 100.0);
        }
    }
    None
}

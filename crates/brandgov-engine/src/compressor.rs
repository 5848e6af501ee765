//! Builds the token-budgeted digital twin from full brand guidelines.

use brandgov_contracts::brand::{BrandGuidelines, ColorUsage, CompressedDigitalTwin};
use tracing::{debug, info};

use crate::config::TwinBudget;
use crate::error::CompressionError;

/// Logo rules are cut to this many words in the minimal representation.
const MINIMAL_LOGO_WORDS: usize = 12;

#[derive(Debug, Clone)]
struct RankedColor {
    hex: String,
    weight: f64,
}

/// Working copy the reduction steps operate on. Colors keep their weights so
/// the lowest-weight swatch can be dropped first.
#[derive(Debug, Clone)]
struct Draft {
    colors: Vec<(ColorUsage, Vec<RankedColor>)>,
    font_families: Vec<String>,
    visual_dos: Vec<String>,
    visual_donts: Vec<String>,
    logo_placement: Option<String>,
    logo_min_size: Option<String>,
}

impl Draft {
    fn from_guidelines(guidelines: &BrandGuidelines, max_rule_words: usize) -> Self {
        let colors = ColorUsage::ALL
            .iter()
            .map(|usage| {
                let mut ranked: Vec<RankedColor> = Vec::new();
                for color in guidelines.colors_for(*usage) {
                    let hex = color.hex.trim().to_ascii_uppercase();
                    if hex.is_empty() || ranked.iter().any(|existing| existing.hex == hex) {
                        continue;
                    }
                    ranked.push(RankedColor {
                        hex,
                        weight: color.usage_weight,
                    });
                }
                ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight));
                (*usage, ranked)
            })
            .collect();

        let mut font_families: Vec<String> = Vec::new();
        for font in &guidelines.fonts {
            let family = font.family.trim();
            if !family.is_empty() && !font_families.iter().any(|existing| existing == family) {
                font_families.push(family.to_string());
            }
        }

        Self {
            colors,
            font_families,
            visual_dos: concise_rules(&guidelines.visual_dos, max_rule_words),
            visual_donts: concise_rules(&guidelines.visual_donts, max_rule_words),
            logo_placement: concise_text(guidelines.logo_rules.placement.as_deref(), max_rule_words),
            logo_min_size: concise_text(guidelines.logo_rules.min_size.as_deref(), max_rule_words),
        }
    }

    fn to_twin(&self) -> CompressedDigitalTwin {
        let mut twin = CompressedDigitalTwin {
            font_families: self.font_families.clone(),
            visual_dos: self.visual_dos.clone(),
            visual_donts: self.visual_donts.clone(),
            logo_placement: self.logo_placement.clone(),
            logo_min_size: self.logo_min_size.clone(),
            ..CompressedDigitalTwin::default()
        };
        for (usage, ranked) in &self.colors {
            *twin.colors_mut(*usage) = ranked.iter().map(|color| color.hex.clone()).collect();
        }
        twin
    }

    fn rule_count(&self) -> usize {
        self.visual_dos.len() + self.visual_donts.len()
    }

    /// Removes `count` rules from the list tails, one at a time from the
    /// longer list with ties going to the dos.
    fn drop_rules(&mut self, count: usize) {
        let (dos, donts) = rule_lengths_after(self.visual_dos.len(), self.visual_donts.len(), count);
        self.visual_dos.truncate(dos);
        self.visual_donts.truncate(donts);
    }

    /// Removes the lowest-weight color among roles that keep at least one.
    /// Ties go to the later entry.
    fn drop_color(&mut self) -> bool {
        let mut candidate: Option<(usize, usize, f64)> = None;
        for (role_idx, (_, ranked)) in self.colors.iter().enumerate() {
            if ranked.len() <= 1 {
                continue;
            }
            for (idx, color) in ranked.iter().enumerate() {
                let replace = match candidate {
                    Some((_, _, weight)) => color.weight <= weight,
                    None => true,
                };
                if replace {
                    candidate = Some((role_idx, idx, color.weight));
                }
            }
        }
        let Some((role_idx, idx, _)) = candidate else {
            return false;
        };
        self.colors[role_idx].1.remove(idx);
        true
    }

    fn drop_font(&mut self) -> bool {
        if self.font_families.len() <= 1 {
            return false;
        }
        self.font_families.pop().is_some()
    }

    fn minimize_logo_rules(&mut self) -> bool {
        let placement = concise_text(self.logo_placement.as_deref(), MINIMAL_LOGO_WORDS);
        let min_size = concise_text(self.logo_min_size.as_deref(), MINIMAL_LOGO_WORDS);
        let changed = placement != self.logo_placement || min_size != self.logo_min_size;
        self.logo_placement = placement;
        self.logo_min_size = min_size;
        changed
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compressor {
    budget: TwinBudget,
}

impl Compressor {
    pub fn new(budget: TwinBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &TwinBudget {
        &self.budget
    }

    /// Returns a twin whose token estimate is strictly below the ceiling, or
    /// `IrreducibleGuidelines` when even the minimal representation is not.
    pub fn compress(
        &self,
        guidelines: &BrandGuidelines,
    ) -> Result<CompressedDigitalTwin, CompressionError> {
        let mut draft = Draft::from_guidelines(guidelines, self.budget.max_rule_words);
        let mut reductions = self.trim_rules(&mut draft);
        let steps: [fn(&mut Draft) -> bool; 3] = [
            Draft::drop_color,
            Draft::drop_font,
            Draft::minimize_logo_rules,
        ];

        for step in steps {
            loop {
                let twin = draft.to_twin();
                match self.check(&twin) {
                    Ok(tokens) => {
                        info!(
                            brand_id = %guidelines.brand_id,
                            tokens,
                            ceiling = self.budget.max_tokens,
                            reductions,
                            "digital twin within budget"
                        );
                        return Ok(twin);
                    }
                    Err(CompressionError::BudgetExceeded { tokens, .. }) => {
                        debug!(brand_id = %guidelines.brand_id, tokens, "twin over budget; reducing");
                    }
                    Err(other) => return Err(other),
                }
                if !step(&mut draft) {
                    break;
                }
                reductions += 1;
            }
        }

        let tokens = draft.to_twin().estimate_tokens();
        Err(CompressionError::IrreducibleGuidelines {
            tokens,
            ceiling: self.budget.max_tokens,
        })
    }

    /// Drops the fewest rules that bring the twin under the ceiling, or all
    /// of them when that is not enough. Every drop shortens the twin, so the
    /// cut point is found by bisection. Returns the number dropped.
    fn trim_rules(&self, draft: &mut Draft) -> usize {
        let total = draft.rule_count();
        if total == 0 || self.fits_without_rules(draft, 0) {
            return 0;
        }
        let mut cut = total;
        if self.fits_without_rules(draft, total) {
            // `low` never fits, `cut` always does.
            let mut low = 0;
            while cut - low > 1 {
                let mid = low + (cut - low) / 2;
                if self.fits_without_rules(draft, mid) {
                    cut = mid;
                } else {
                    low = mid;
                }
            }
        }
        debug!(dropped = cut, of = total, "dropped visual rules");
        draft.drop_rules(cut);
        cut
    }

    fn fits_without_rules(&self, draft: &Draft, count: usize) -> bool {
        let mut candidate = draft.clone();
        candidate.drop_rules(count);
        self.check(&candidate.to_twin()).is_ok()
    }

    fn check(&self, twin: &CompressedDigitalTwin) -> Result<u64, CompressionError> {
        let tokens = twin.estimate_tokens();
        if tokens < self.budget.max_tokens {
            return Ok(tokens);
        }
        Err(CompressionError::BudgetExceeded {
            tokens,
            ceiling: self.budget.max_tokens,
        })
    }
}

/// List lengths after `count` drops from `(dos, donts)`: the longer list is
/// cut until both match, then the two alternate starting with the dos.
fn rule_lengths_after(dos: usize, donts: usize, count: usize) -> (usize, usize) {
    let count = count.min(dos + donts);
    let gap = dos.abs_diff(donts).min(count);
    let (mut dos, mut donts) = if dos >= donts {
        (dos - gap, donts)
    } else {
        (dos, donts - gap)
    };
    let rest = count - gap;
    dos -= rest.div_ceil(2);
    donts -= rest / 2;
    (dos, donts)
}

fn concise_rules(rules: &[String], max_words: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for rule in rules {
        let Some(text) = concise_text(Some(rule), max_words) else {
            continue;
        };
        if !out.contains(&text) {
            out.push(text);
        }
    }
    out
}

fn concise_text(text: Option<&str>, max_words: usize) -> Option<String> {
    let words: Vec<&str> = text?.split_whitespace().take(max_words.max(1)).collect();
    if words.is_empty() {
        return None;
    }
    Some(words.join(" "))
}

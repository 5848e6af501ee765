mod guidelines;
mod twin;

pub use guidelines::{
    BrandGuidelines, Color, ColorUsage, FontFamily, LogoRules, RawColor, RawFont, RawGuideline,
};
pub use twin::{estimate_text_tokens, CompressedDigitalTwin};

//! Seed-fact files.
//!
//! A seed file describes one property before discovery: its key, any
//! known book/page and instrument references, legal descriptions by
//! provenance tier, known parties and the current owner. `.json` files are
//! read as JSON; everything else as TOML.
//!
//! ```toml
//! property = "A1234567890"
//! current_owner = "MARY JONES"
//! sale_instrument = "2018100200"
//!
//! [plat_book_page]
//! book = "82"
//! page = "21"
//!
//! [[legal_descriptions]]
//! text = "LOT 198 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS"
//! tier = "primary"
//!
//! [[parties]]
//! name = "JOHN SMITH"
//! date_from = "2018-01-01"
//! ```

use anyhow::{Context, Result};
use std::path::Path;

use title_chain_core::models::SeedFacts;

pub fn load_seed(path: &Path) -> Result<SeedFacts> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let seed = if is_json {
        parse_json(&content)
    } else {
        parse_toml(&content)
    }
    .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;

    Ok(seed)
}

pub fn parse_toml(content: &str) -> Result<SeedFacts> {
    let seed: SeedFacts = toml::from_str(content)?;
    validate(seed)
}

pub fn parse_json(content: &str) -> Result<SeedFacts> {
    let seed: SeedFacts = serde_json::from_str(content)?;
    validate(seed)
}

fn validate(mut seed: SeedFacts) -> Result<SeedFacts> {
    seed.property = seed.property.trim().to_string();
    if seed.property.is_empty() {
        anyhow::bail!("seed property must not be empty");
    }
    seed.current_owner = seed
        .current_owner
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty());
    seed.legal_descriptions.retain(|l| !l.text.trim().is_empty());
    seed.parties.retain(|p| !p.name.trim().is_empty());
    Ok(seed)
}

use log::{debug, warn};
use serde_json::Value;

/// One structured item parsed out of the model's raw output, not yet written
/// to the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItemCandidate {
    pub item: String,
    pub info: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    #[error("extraction output could not be parsed as a JSON array: {reason}")]
    Malformed {
        reason: String,
        raw_excerpt: String,
        cleaned_excerpt: String,
    },
}

const EXCERPT_CHARS: usize = 200;

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

/// Removes a leading ```json or ``` marker and a trailing ``` marker, if
/// present, then trims surrounding whitespace. Unfenced input passes through
/// unchanged apart from the trim.
pub fn strip_code_fences(raw: &str) -> String {
    let mut cleaned = raw.trim();

    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }

    if let Some(rest) = cleaned.trim_end().strip_suffix("```") {
        cleaned = rest;
    }

    cleaned.trim().to_string()
}

/// Parses the model's raw output into candidate records. Individual elements
/// missing a usable item name or info string are dropped; output that is not
/// a JSON array at all is a hard failure.
pub fn parse_menu_items(raw: &str) -> Result<Vec<MenuItemCandidate>, SanitizeError> {
    let cleaned = strip_code_fences(raw);

    let parsed: Value = serde_json::from_str(&cleaned).map_err(|e| SanitizeError::Malformed {
        reason: e.to_string(),
        raw_excerpt: excerpt(raw),
        cleaned_excerpt: excerpt(&cleaned),
    })?;

    let entries = parsed.as_array().ok_or_else(|| SanitizeError::Malformed {
        reason: "expected a JSON array of menu items".to_string(),
        raw_excerpt: excerpt(raw),
        cleaned_excerpt: excerpt(&cleaned),
    })?;

    let mut candidates = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let item = entry
            .get("item")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let info = entry
            .get("info")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (item, info) {
            (Some(item), Some(info)) => candidates.push(MenuItemCandidate {
                item: item.to_string(),
                info: info.to_string(),
            }),
            _ => {
                warn!("Dropping menu item {} with missing item name or info", index);
            }
        }
    }

    debug!("Parsed {} menu item candidates from extraction output", candidates.len());
    Ok(candidates)
}

use std::env;
use std::sync::OnceLock;

static NORM_FUSION_DISABLED: OnceLock<bool> = OnceLock::new();
static VERIFY_REWRITES: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn flag(cell: &OnceLock<bool>, name: &str) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// `FUSEGRAPH_DISABLE_NORM_FUSION`: skip the normalization fusion pass.
pub(crate) fn norm_fusion_disabled() -> bool {
    flag(&NORM_FUSION_DISABLED, "FUSEGRAPH_DISABLE_NORM_FUSION")
}

/// `FUSEGRAPH_VERIFY_REWRITES`: re-verify graph invariants after each rewrite.
pub(crate) fn verify_rewrites_forced() -> bool {
    flag(&VERIFY_REWRITES, "FUSEGRAPH_VERIFY_REWRITES")
}

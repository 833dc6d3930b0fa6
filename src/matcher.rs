//! Name Matcher (C1) — pure, case-insensitive, singular/plural and
//! normalized name equality and scoring. No I/O, no suspension points.

/// Trim and lowercase for comparison.
fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Strip everything but ASCII alphanumerics, lower-cased.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Naive English singular/plural agreement: `a` and `b` agree if adding or
/// removing a single trailing `s` (case-insensitively) makes them equal.
fn singular_plural_match(a: &str, b: &str) -> bool {
    let (a, b) = (fold(a), fold(b));
    if a == b {
        return false; // handled by exact match; keep this predicate exclusive
    }
    (a.len() == b.len() + 1 && a.ends_with('s') && a[..a.len() - 1] == b)
        || (b.len() == a.len() + 1 && b.ends_with('s') && b[..b.len() - 1] == a)
}

/// True iff `a` and `b` are the same name under case-folding, trailing-`s`
/// singular/plural agreement, or normalized (alphanumeric-only) equality.
pub fn matches(a: &str, b: &str) -> bool {
    let (fa, fb) = (fold(a), fold(b));
    fa == fb || singular_plural_match(a, b) || normalize(a) == normalize(b)
}

/// True iff `candidate` contains `requested` as a case-insensitive substring.
pub fn contains(candidate: &str, requested: &str) -> bool {
    fold(candidate).contains(&fold(requested))
}

/// True iff `a` and `b` are equal after normalization (alphanumeric-only,
/// lower-cased) — distinct from `matches`, which also covers plural/exact.
pub fn normalized_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Last path segment of a namespaced name (`App\Models\Email` -> `Email`,
/// `App.Models.Email` -> `Email`). Used by collection ownership checks so a
/// fully-qualified class name still matches its short form.
pub fn basename(s: &str) -> &str {
    s.rsplit(['\\', '/', '.', ':']).next().unwrap_or(s)
}

/// True iff `node_collection` names the same collection as `requested`,
/// either directly (via `matches`) or through one of its declared aliases,
/// or by basename agreement (spec §4.8 `nodeOwnsCollection`).
pub fn owns_collection(node_collection: &str, aliases: &[String], requested: &str) -> bool {
    if matches(node_collection, requested) || matches(basename(node_collection), requested) {
        return true;
    }
    aliases.iter().any(|a| matches(a, requested))
}

/// Score a candidate name against a query, taking the maximum across exact,
/// singular/plural, normalized, substring (both directions), and alias
/// matches, per spec §4.1.
pub fn score(candidate: &str, query: &str, aliases: &[String]) -> u32 {
    let mut best = 0u32;

    if fold(candidate) == fold(query) {
        best = best.max(100);
    }
    if singular_plural_match(candidate, query) {
        best = best.max(90);
    }
    if best < 85 && normalize(candidate) == normalize(query) {
        best = best.max(85);
    }
    if contains(candidate, query) {
        best = best.max(70);
    }
    if contains(query, candidate) {
        best = best.max(50);
    }
    for alias in aliases {
        if fold(alias) == fold(query) {
            best = best.max(80);
        } else if contains(alias, query) || contains(query, alias) {
            best = best.max(40);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_case_insensitive() {
        assert!(matches("Invoice", "invoice"));
    }

    #[test]
    fn trailing_s_plural_agrees() {
        assert!(matches("Invoices", "invoice"));
        assert!(matches("invoice", "Invoices"));
    }

    #[test]
    fn unrelated_names_do_not_match() {
        assert!(!matches("Invoice", "Receipt"));
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize("App\\Models\\Email"), "appmodelsemail");
        assert!(normalized_match("App\\Models\\Email", "App Models Email"));
    }

    #[test]
    fn score_prefers_exact_over_substring() {
        assert_eq!(score("Invoice", "Invoice", &[]), 100);
        assert_eq!(score("Invoices", "Invoice", &[]), 90);
        assert!(score("InvoiceArchive", "Invoice", &[]) >= 70);
        assert!(score("Invoice", "InvoiceArchive", &[]) >= 50);
    }

    #[test]
    fn score_aliases_contribute() {
        let aliases = vec!["bills".to_string()];
        assert_eq!(score("Invoice", "bills", &aliases), 80);
    }

    #[test]
    fn score_zero_when_nothing_matches() {
        assert_eq!(score("Invoice", "Weather", &[]), 0);
    }

    #[test]
    fn basename_strips_namespace() {
        assert_eq!(basename("App\\Models\\Email"), "Email");
        assert_eq!(basename("com.acme.Invoice"), "Invoice");
        assert_eq!(basename("Plain"), "Plain");
    }

    #[test]
    fn owns_collection_matches_by_basename_or_alias() {
        assert!(owns_collection("App\\Models\\Invoice", &[], "Invoice"));
        assert!(owns_collection("Invoice", &["bills".into()], "bills"));
        assert!(!owns_collection("Invoice", &[], "Receipt"));
    }
}

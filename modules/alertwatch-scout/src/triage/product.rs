use std::sync::LazyLock;

use alertwatch_common::ProductDetails;
use regex::Regex;

static RE_HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_PRODUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)recall:\s*([^(\[\n]+)").unwrap());
static RE_BATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:batch|lot)(?:\s+(?:number|no\.?))?s?\s*[:#]?\s*([A-Z0-9][A-Z0-9\-/]{2,})")
        .unwrap()
});
static RE_EXPIRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:expiry|exp\.?|expires?)(?:\s+date)?\s*[:\-]?\s*(\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}|\d{1,2}\s+[A-Za-z]{3,9}\s+\d{4}|[A-Za-z]{3,9}\s+\d{4})")
        .unwrap()
});
static REGULATOR_REFS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\(([A-Z]+\(\d+\)[A-Z]?/\d+)\)").unwrap(),
        Regex::new(r"\(([A-Za-z]+/\d+/\d+)\)").unwrap(),
        Regex::new(r"\(([A-Z]+-\d+-\d+)\)").unwrap(),
    ]
});

const THERAPEUTIC_AREAS: &[(&str, &[&str])] = &[
    (
        "Cardiovascular",
        &["heart", "cardiac", "blood pressure", "hypertension", "statin", "anticoagulant", "warfarin"],
    ),
    ("Diabetes", &["diabetes", "insulin", "metformin", "glucose", "glycaemic"]),
    ("Respiratory", &["asthma", "copd", "inhaler", "respiratory", "salbutamol"]),
    (
        "Mental Health",
        &["antidepressant", "antipsychotic", "anxiety", "depression", "lithium", "valproate"],
    ),
    ("Pain Management", &["analgesic", "opioid", "pain", "paracetamol", "ibuprofen", "codeine"]),
    ("Antibiotics", &["antibiotic", "antibacterial", "amoxicillin", "penicillin", "infection"]),
];

/// Longest batch identifier still useful as a record-system search term.
const MAX_SEARCH_BATCH_LEN: usize = 20;

pub fn strip_html(text: &str) -> String {
    RE_HTML_TAG
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pull product name, batches, expiry and therapeutic area out of the
/// publication text, and build search terms for the clinical record system.
pub fn extract(title: &str, description: Option<&str>, body: Option<&str>) -> ProductDetails {
    let body = body.map(strip_html).unwrap_or_default();
    let text = [title, description.unwrap_or_default(), body.as_str()].join("\n");

    let product_name = RE_PRODUCT
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_end_matches([',', ';', '-']).trim().to_string())
        .filter(|n| !n.is_empty());

    let batches = unique_captures(&RE_BATCH, &text);
    let expiries = unique_captures(&RE_EXPIRY, &text);

    let lowered = text.to_lowercase();
    let therapeutic_area = THERAPEUTIC_AREAS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(area, _)| area.to_string());

    let mut terms = Vec::new();
    if let Some(name) = &product_name {
        terms.push(name.clone());
    }
    terms.extend(
        batches
            .iter()
            .filter(|b| b.len() < MAX_SEARCH_BATCH_LEN)
            .map(|b| format!("batch:{b}")),
    );

    ProductDetails {
        product_name,
        batch_numbers: joined(&batches),
        expiry_dates: joined(&expiries),
        therapeutic_area,
        search_terms: (!terms.is_empty()).then(|| terms.join(" OR ")),
    }
}

/// Regulator reference quoted in the title, e.g. `(EL(25)A/29)`.
pub fn regulator_reference(title: &str) -> Option<String> {
    REGULATOR_REFS.iter().find_map(|re| {
        re.captures(title)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn unique_captures(re: &Regex, text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in re.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            let value = m.as_str().trim().to_string();
            if !out.contains(&value) {
                out.push(value);
            }
        }
    }
    out
}

fn joined(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_recall_details() {
        let details = extract(
            "Class 2 Medicines Recall: Example Metformin Tablets 500mg (EL(25)A/29)",
            Some("Batch number: AB1234 is being recalled"),
            Some("<p>Batch: CD5678, expiry date: 03/2026</p><p>Expiry: 31/03/2026</p>"),
        );
        assert_eq!(details.product_name.as_deref(), Some("Example Metformin Tablets 500mg"));
        assert_eq!(details.batch_numbers.as_deref(), Some("AB1234, CD5678"));
        assert_eq!(details.expiry_dates.as_deref(), Some("31/03/2026"));
        assert_eq!(details.therapeutic_area.as_deref(), Some("Diabetes"));
        assert_eq!(
            details.search_terms.as_deref(),
            Some("Example Metformin Tablets 500mg OR batch:AB1234 OR batch:CD5678")
        );
    }

    #[test]
    fn nothing_to_extract() {
        let details = extract("MHRA Safety Roundup: March", None, None);
        assert_eq!(details, ProductDetails::default());
    }

    #[test]
    fn strips_markup() {
        assert_eq!(strip_html("<p>Hello <b>there</b></p>\n<br/>"), "Hello there");
    }

    #[test]
    fn regulator_references() {
        assert_eq!(
            regulator_reference("Class 2 Medicines Recall: X (EL(25)A/29)").as_deref(),
            Some("EL(25)A/29")
        );
        assert_eq!(
            regulator_reference("Valproate (NatPSA/2025/001)").as_deref(),
            Some("NatPSA/2025/001")
        );
        assert_eq!(regulator_reference("Pump issue (MDA-2025-001)").as_deref(), Some("MDA-2025-001"));
        assert_eq!(regulator_reference("No reference here"), None);
    }
}

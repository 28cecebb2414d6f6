//! Text preparation applied to literature before it becomes a [`Document`].
//!
//! [`Document`]: crate::Document

use std::sync::LazyLock;

use regex::Regex;

use crate::source::Article;

/// Clinical abbreviations expanded in place as `ABBR (full form)`.
///
/// `OR` and `ER` are left out: in abstracts they far more often mean odds
/// ratio and estrogen receptor than operating or emergency room.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("MI", "myocardial infarction"),
    ("HTN", "hypertension"),
    ("DM", "diabetes mellitus"),
    ("CAD", "coronary artery disease"),
    ("COPD", "chronic obstructive pulmonary disease"),
    ("CHF", "congestive heart failure"),
    ("CVA", "cerebrovascular accident"),
    ("ICU", "intensive care unit"),
    ("CT", "computed tomography"),
    ("MRI", "magnetic resonance imaging"),
    ("ECG", "electrocardiogram"),
    ("EKG", "electrocardiogram"),
    ("CBC", "complete blood count"),
    ("BUN", "blood urea nitrogen"),
    ("HIV", "human immunodeficiency virus"),
    ("AIDS", "acquired immunodeficiency syndrome"),
    ("COVID", "coronavirus disease"),
    ("SARS", "severe acute respiratory syndrome"),
    ("MERS", "Middle East respiratory syndrome"),
];

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static DOUBLE_QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{201C}\u{201D}\u{201E}]").expect("valid regex"));
static SINGLE_QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{2018}\u{2019}\u{201A}]").expect("valid regex"));
static DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{2013}\u{2014}]").expect("valid regex"));
static ABBREVIATION: LazyLock<Regex> = LazyLock::new(|| {
    let alternation: Vec<&str> = ABBREVIATIONS.iter().map(|(abbr, _)| *abbr).collect();
    Regex::new(&format!(r"\b(?:{})\b", alternation.join("|"))).expect("valid regex")
});
static UNITS: LazyLock<[(Regex, &'static str); 3]> = LazyLock::new(|| {
    [
        (Regex::new(r"(?i)\bmg/dl\b").expect("valid regex"), "mg/dL"),
        (Regex::new(r"(?i)\bmmhg\b").expect("valid regex"), "mmHg"),
        (Regex::new(r"(?i)\bkg/m2\b").expect("valid regex"), "kg/m²"),
    ]
});

/// Normalise raw abstract text: drop markup, fold typographic punctuation
/// and collapse all whitespace runs to single spaces.
pub fn clean_text(text: &str) -> String {
    let text = HTML_TAG.replace_all(text, "");
    let text = DOUBLE_QUOTES.replace_all(&text, "\"");
    let text = SINGLE_QUOTES.replace_all(&text, "'");
    let text = DASHES.replace_all(&text, "-");
    let text = text.replace('\u{2026}', "...");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Expand clinical abbreviations and normalise unit spelling.
///
/// Matching is case-sensitive on word boundaries. An abbreviation already
/// followed by ` (` or used as a prefix (`COVID-19`) is left alone, so
/// running this twice changes nothing.
pub fn expand_abbreviations(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 64);
    let mut last = 0;
    for m in ABBREVIATION.find_iter(text) {
        out.push_str(&text[last..m.end()]);
        last = m.end();
        let rest = &text[m.end()..];
        if rest.starts_with(" (") || rest.starts_with('-') {
            continue;
        }
        if let Some((_, full)) = ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == m.as_str()) {
            out.push_str(" (");
            out.push_str(full);
            out.push(')');
        }
    }
    out.push_str(&text[last..]);

    UNITS.iter().fold(out, |acc, (re, replacement)| re.replace_all(&acc, *replacement).into_owned())
}

/// The text an article is indexed by: title, abstract, MeSH terms and
/// keywords as labelled sections.
pub fn searchable_text(article: &Article) -> String {
    let mut parts = Vec::new();
    if !article.title.trim().is_empty() {
        parts.push(format!("Title: {}", article.title.trim()));
    }
    if !article.abstract_text.trim().is_empty() {
        parts.push(format!("Abstract: {}", article.abstract_text.trim()));
    }
    if !article.mesh_terms.is_empty() {
        parts.push(format!("MeSH Terms: {}", article.mesh_terms.join(", ")));
    }
    if !article.keywords.is_empty() {
        parts.push(format!("Keywords: {}", article.keywords.join(", ")));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_markup_and_whitespace() {
        let raw = "<i>Background</i>:\r\n\tPatients\u{2014}aged \u{201C}over 65\u{201D}\u{2026}  ";
        assert_eq!(clean_text(raw), "Background: Patients-aged \"over 65\"...");
    }

    #[test]
    fn expands_known_abbreviations_once() {
        let once = expand_abbreviations("Acute MI and HTN were assessed by ECG.");
        assert_eq!(
            once,
            "Acute MI (myocardial infarction) and HTN (hypertension) were assessed by ECG (electrocardiogram)."
        );
        assert_eq!(expand_abbreviations(&once), once);
    }

    #[test]
    fn leaves_lowercase_and_prefixes_alone() {
        assert_eq!(expand_abbreviations("COVID-19 or mild cases"), "COVID-19 or mild cases");
        assert_eq!(expand_abbreviations("admitted"), "admitted");
    }

    #[test]
    fn normalises_units() {
        assert_eq!(
            expand_abbreviations("glucose 126 MG/DL, BP 140 mmhg, BMI 30 kg/m2"),
            "glucose 126 mg/dL, BP 140 mmHg, BMI 30 kg/m²"
        );
    }

    #[test]
    fn searchable_text_labels_sections() {
        let article = Article {
            pmid: "1".into(),
            title: "Statins".into(),
            abstract_text: "Statins lower LDL.".into(),
            mesh_terms: vec!["Hyperlipidemias".into(), "Statins".into()],
            ..Default::default()
        };
        assert_eq!(
            searchable_text(&article),
            "Title: Statins\n\nAbstract: Statins lower LDL.\n\nMeSH Terms: Hyperlipidemias, Statins"
        );
    }
}

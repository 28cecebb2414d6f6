//! Prompt assembly under a character budget.
//!
//! The prompt is the instruction template with three placeholders filled
//! in: `{context}` (the serialized passages), `{question}` (the question as
//! the user asked it, never the translation) and `{language}` (the language
//! the answer should be written in). When the passages do not all fit the
//! budget the lowest-ranked ones are dropped first; the instructions and the
//! question are never cut.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::document::{SearchResult, keys};
use crate::error::{RagError, Result};
use crate::retriever::RetrievalResult;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(context|question|language)\}").expect("valid regex"));

/// The built-in instructions: answer only from the supplied literature.
pub const DEFAULT_TEMPLATE: &str = "\
You are a medical literature assistant. Answer using only the biomedical literature excerpts below.

Rules:
1. Use only information found in the excerpts. Do not rely on outside knowledge.
2. Summarize what the literature reports; do not give a diagnosis or personal treatment advice.
3. If the excerpts do not address something, say that the literature provided does not mention it.
4. Cite the PMID of every excerpt you rely on, and list the cited PMIDs at the end.
5. Write the answer in {language}, and recommend consulting a healthcare professional.

Literature excerpts:
{context}

Question: {question}

Answer:";

/// An instruction template with `{context}` and `{question}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless the template
    /// contains `{context}` and `{question}` exactly once each. The budget
    /// counts every passage once, so a repeated slot would overrun it.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        for required in ["context", "question"] {
            let occurrences = PLACEHOLDER.captures_iter(&text).filter(|c| &c[1] == required).count();
            if occurrences != 1 {
                return Err(RagError::InvalidConfiguration(format!(
                    "prompt template must contain {{{required}}} exactly once, found {occurrences}"
                )));
            }
        }
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Substitute every placeholder in one pass, so placeholder-like text in
    /// the question or passages is left as is.
    fn render(&self, context: &str, question: &str, language: &str) -> String {
        PLACEHOLDER
            .replace_all(&self.text, |caps: &Captures<'_>| match &caps[1] {
                "context" => context.to_string(),
                "question" => question.to_string(),
                _ => language.to_string(),
            })
            .into_owned()
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { text: DEFAULT_TEMPLATE.to_string() }
    }
}

/// The prompt for one question plus the passages it actually contains.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub question: String,
    pub prompt: String,
    /// The passages included in `prompt`, best first.
    pub sources: Vec<SearchResult>,
    /// Passages left out to respect the budget.
    pub dropped: usize,
}

/// Builds [`GenerationRequest`]s.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    template: PromptTemplate,
    budget: usize,
    language: String,
}

impl PromptAssembler {
    /// `budget` is the maximum prompt length in characters; `language` is
    /// the language answers are requested in.
    pub fn new(template: PromptTemplate, budget: usize, language: impl Into<String>) -> Self {
        Self { template, budget, language: language.into() }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Assemble the prompt for `question` from the retrieved passages.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if the question and instructions
    /// alone exceed the budget.
    pub fn assemble(&self, question: &str, retrieval: &RetrievalResult) -> Result<GenerationRequest> {
        let fixed = self.template.render("", question, &self.language).chars().count();
        if fixed > self.budget {
            return Err(RagError::InvalidInput(format!(
                "question and instructions take {fixed} characters, over the prompt budget of {}",
                self.budget
            )));
        }

        let mut context = String::new();
        let mut used = fixed;
        let mut sources = Vec::new();
        for (rank, hit) in retrieval.hits.iter().enumerate() {
            let block = serialize_passage(rank + 1, hit);
            let separator = if context.is_empty() { "" } else { "\n\n" };
            let cost = separator.len() + block.chars().count();
            if used + cost > self.budget {
                break;
            }
            context.push_str(separator);
            context.push_str(&block);
            used += cost;
            sources.push(hit.clone());
        }

        let dropped = retrieval.hits.len() - sources.len();
        if dropped > 0 {
            warn!(dropped, kept = sources.len(), budget = self.budget, "prompt budget exceeded, dropped lowest-ranked passages");
        }

        let prompt = self.template.render(&context, question, &self.language);
        debug!(chars = prompt.chars().count(), passages = sources.len(), "assembled prompt");
        Ok(GenerationRequest { question: question.to_string(), prompt, sources, dropped })
    }
}

/// One passage with its provenance.
fn serialize_passage(rank: usize, hit: &SearchResult) -> String {
    let chunk = &hit.entry.chunk;
    let venue = chunk.metadata.get(keys::VENUE).map(String::as_str).unwrap_or("");
    let published = chunk.metadata.get(keys::PUBLISHED).map(String::as_str).unwrap_or("");

    let mut block = format!("[{rank}] PMID: {}", chunk.document_id);
    if let Some(title) = chunk.title() {
        let _ = write!(block, " | {title}");
    }
    let authors = chunk.metadata_list(keys::AUTHORS);
    if !authors.is_empty() {
        let shown = authors.iter().take(2).cloned().collect::<Vec<_>>().join(", ");
        let et_al = if authors.len() > 2 { " et al." } else { "" };
        let _ = write!(block, " | {shown}{et_al}");
    }
    match (venue, published) {
        ("", "") => {}
        (venue, "") => {
            let _ = write!(block, " | {venue}");
        }
        ("", date) => {
            let _ = write!(block, " | {date}");
        }
        (venue, date) => {
            let _ = write!(block, " | {venue} ({date})");
        }
    }
    let _ = write!(block, "\nSimilarity: {:.3}\nContent: {}", hit.score, chunk.text);
    block
}

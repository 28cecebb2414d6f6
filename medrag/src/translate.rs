//! Question translation into the corpus language.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{RagError, Result};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::timeout::bounded;

/// Translates questions with the shared [`TextGenerator`].
///
/// Every failure (unreachable service, timeout, empty or unusable output)
/// surfaces as [`RagError::TranslationUnavailable`]. Whether to fall back to
/// the untranslated question is the retriever's decision, not this type's.
#[derive(Clone)]
pub struct QueryTranslator {
    llm: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl QueryTranslator {
    pub fn new(llm: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Translate `question` from `source_language` into `target_language`.
    pub async fn translate(
        &self,
        question: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String> {
        let prompt = translation_prompt(question, source_language, target_language);
        debug!(llm = self.llm.name(), target = target_language, "translating question");

        let raw = bounded(
            "translation",
            self.timeout,
            self.llm.generate_text(&prompt, &GenerationOptions::TRANSLATION),
        )
        .await
        .map_err(|e| {
            warn!(llm = self.llm.name(), error = %e, "translation call failed");
            RagError::TranslationUnavailable(e.to_string())
        })?;

        let translated = first_sentence(&raw);
        if translated.is_empty() {
            return Err(RagError::TranslationUnavailable(
                "model returned an empty translation".to_string(),
            ));
        }
        info!(original = question, translated = %translated, "translated question");
        Ok(translated)
    }
}

fn translation_prompt(question: &str, source: &str, target: &str) -> String {
    format!(
        "Translate this {source} medical query to {target}. Use precise medical terminology. \
         Give only the {target} translation, no explanations.\n\n{source}: {question}\n{target}:"
    )
}

/// Fold line breaks and keep only the first sentence; models tend to append
/// an explanation after the translation.
fn first_sentence(raw: &str) -> String {
    let folded = raw.replace(['\r', '\n'], " ");
    let folded = folded.trim();
    let mut chars = folded.char_indices().peekable();
    let mut cut = folded.len();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!' | '。')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace())
        {
            cut = if c == '.' { i } else { i + c.len_utf8() };
            break;
        }
    }
    folded[..cut].trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

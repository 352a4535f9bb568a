use super::markers::{SENTENCE_BREAK, WORD_MARKER};

/// First request: a fresh story using every word once.
pub fn initial_prompt<S: AsRef<str>>(words: &[S], user_context: &str, language: &str) -> String {
    let mut prompt = format!(
        "Write a short, coherent story in {language} for a language learner.\n\
         Use every word from the list below exactly once.\n\
         Wrap each list word you use in asterisks, for example {m}word{m}.\n\
         Do not put asterisks anywhere else.\n\
         Put the token {SENTENCE_BREAK} right after every sentence.\n\
         Reply with the story only.\n",
        m = WORD_MARKER,
    );
    let context = user_context.trim();
    if !context.is_empty() {
        prompt.push_str(&format!("The story should be about: {context}\n"));
    }
    prompt.push_str("\nWords:\n");
    prompt.push_str(&word_list(words));
    prompt
}

/// Follow-up request asking the model to work in the words it left out.
pub fn corrective_prompt<S: AsRef<str>>(previous_text: &str, missing: &[S], language: &str) -> String {
    format!(
        "Here is a story in {language}:\n\n{previous_text}\n\n\
         It is missing these words:\n{list}\n\
         Extend or revise the story so that it also uses exactly these missing words, \
         each once, wrapped in asterisks like {m}word{m}.\n\
         Keep the existing sentences, the existing {m}marked{m} words and every \
         {SENTENCE_BREAK} token. Put {SENTENCE_BREAK} after each new sentence.\n\
         Reply with the complete story only.",
        list = word_list(missing),
        m = WORD_MARKER,
    )
}

/// Sentence-aligned translation of a finished story.
pub fn translation_prompt(clean_text: &str, target_language: &str) -> String {
    format!(
        "Translate the following story into {target_language}.\n\
         Translate sentence by sentence and keep every {SENTENCE_BREAK} token \
         exactly where it is, so each translated sentence ends with {SENTENCE_BREAK}.\n\
         Reply with the translation only.\n\n{clean_text}"
    )
}

fn word_list<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| format!("- {}\n", w.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_prompt_lists_words_and_context() {
        let prompt = initial_prompt(&["apple", "river"], "  a picnic ", "English");
        assert!(prompt.contains("- apple\n- river\n"));
        assert!(prompt.contains("about: a picnic"));
        assert!(prompt.contains("*word*"));
        assert!(prompt.contains(SENTENCE_BREAK));
    }

    #[test]
    fn initial_prompt_omits_empty_context() {
        let prompt = initial_prompt(&["apple"], "   ", "English");
        assert!(!prompt.contains("about:"));
    }

    #[test]
    fn corrective_prompt_carries_text_and_missing_words() {
        let prompt = corrective_prompt("The *cat* sat.[BR]", &["dog"], "English");
        assert!(prompt.contains("The *cat* sat.[BR]"));
        assert!(prompt.contains("- dog\n"));
    }
}

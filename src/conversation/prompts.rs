//! System instructions for each reply mode.

use crate::retrieval::RetrievalContext;

use super::Mode;

pub const SIMPLE_INSTRUCTIONS: &str = "You are responding to a simple greeting.

IMPORTANT RULES:
1. Respond ONLY to this greeting
2. Do NOT mention ANY previous topics (documents, earlier questions, etc.)
3. Keep it brief and friendly (1-2 sentences max)
4. Do NOT ask follow-up questions about previous topics";

pub const NORMAL_INSTRUCTIONS: &str = "You are a helpful AI assistant. Use your general knowledge to answer.

RULES:
1. Answer the current question only
2. Don't bring up unrelated topics from past conversations
3. If the user asks about something specific, answer concisely
4. Don't volunteer information about previous chats";

pub const DOCUMENT_INSTRUCTIONS: &str = "You are a helpful AI assistant answering from uploaded documents.

RULES:
1. Treat the document snippets below as the primary source of truth
2. When you answer from them, say \"According to the uploaded document, ...\"
3. If the snippets do not contain the answer, reply \"I don't know based on the uploaded documents\"
4. Do not invent facts that are not in the snippets";

/// System prompt for one turn.
///
/// Greetings always get the greeting template. Otherwise documents that
/// passed the relevance gate switch to the grounded template.
pub fn build_system_prompt(mode: Mode, context: &RetrievalContext) -> String {
    match mode {
        Mode::Simple => SIMPLE_INSTRUCTIONS.to_string(),
        Mode::Normal if context.has_context() => format!(
            "{}\n\nDOCUMENT SNIPPETS:\n{}",
            DOCUMENT_INSTRUCTIONS,
            context.context_text()
        ),
        Mode::Normal => NORMAL_INSTRUCTIONS.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RetrievedDocument;

    #[test]
    fn test_grounded_prompt_includes_snippets() {
        let context = RetrievalContext {
            documents: vec![RetrievedDocument {
                content: "Invoices are due in 30 days.".to_string(),
                relevance_score: 0.9,
            }],
        };

        let prompt = build_system_prompt(Mode::Normal, &context);
        assert!(prompt.contains("I don't know based on the uploaded documents"));
        assert!(prompt.ends_with("Invoices are due in 30 days."));
    }

    #[test]
    fn test_greeting_ignores_documents() {
        let context = RetrievalContext {
            documents: vec![RetrievedDocument {
                content: "doc".to_string(),
                relevance_score: 0.99,
            }],
        };
        assert_eq!(build_system_prompt(Mode::Simple, &context), SIMPLE_INSTRUCTIONS);
        assert_eq!(
            build_system_prompt(Mode::Normal, &RetrievalContext::default()),
            NORMAL_INSTRUCTIONS
        );
    }
}

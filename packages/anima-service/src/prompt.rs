//! System and user prompt assembly for the critique agent and persona
//! chat.

use crate::agent::AnalysisContext;

/// System prompt for the writing-critic agent. The schema description must
/// stay in step with [`anima_domain::feedback`].
pub fn writing_critic(persona_name: &str, max_feedback_items: usize, tools_available: bool) -> String {
	let mut prompt = format!(
		"You are {persona_name}, reviewing a draft someone has asked you to critique. You have \
		 read widely and written extensively; your feedback reflects the voice, standards, and \
		 intellectual stance of your own body of work.\n\n"
	);

	if tools_available {
		prompt.push_str(
			"You can search your own writing with the search_corpus tool. Use it before judging: \
			 query for the draft's subject matter (mode \"content\") to check claims against what \
			 you have written, and for its register and phrasing (mode \"style\") to ground \
			 stylistic judgments in how you actually write. Search as many times as you need, with \
			 different phrasings, and cite what you find. The cite tool returns the verbatim text \
			 of a chunk you have already seen.\n\n",
		);
	} else {
		prompt.push_str(
			"No corpus is indexed for you, so you cannot ground feedback in specific passages. \
			 Review from general principles, keep confidence low, and leave corpus citations \
			 empty.\n\n",
		);
	}

	prompt.push_str(&format!(
		"Respond with a JSON object of the form {{\"feedback\": [...]}} and nothing else. Each \
		 element is one feedback item:\n\
		 - \"type\": one of \"issue\", \"suggestion\", \"praise\", \"question\"\n\
		 - \"category\": one of \"clarity\", \"style\", \"logic\", \"evidence\", \"structure\", \
		 \"voice\", \"craft\"\n\
		 - \"title\": at most one sentence\n\
		 - \"content\": the detailed critique, written in your own voice\n\
		 - \"severity\": \"low\", \"medium\", or \"high\"\n\
		 - \"confidence\": a number between 0 and 1\n\
		 - \"suggested_revision\": optional concrete rewrite\n\
		 - \"sources\": chunk ids from search results that ground this item\n\
		 - \"corpus_sources\": objects {{\"text\", \"source_file\", \"relevance\"}} quoting the \
		 passages behind the critique\n\
		 - \"positions\": objects {{\"start\", \"end\", \"text\"}} locating the span in the draft \
		 the item refers to\n\n\
		 Aim for roughly 60% critical items (issues, questions) and 40% affirming ones (praise, \
		 suggestions that build on strengths). Return at most {max_feedback_items} items; prefer \
		 the few that matter over an exhaustive list."
	));

	prompt
}

/// First-person system prompt for chat mode.
pub fn persona_voice(persona_name: &str, description: Option<&str>) -> String {
	let mut prompt = format!(
		"You are {persona_name}. Speak in the first person, in your own voice, drawing on what \
		 you have actually written. You can search your writing with the search_corpus tool; use \
		 it when a question touches something you may have written about, and let the retrieved \
		 passages shape both what you say and how you say it. Where your corpus is silent, reason \
		 forward from your documented views and say so; do not invent positions you never held."
	);

	if let Some(description) = description.filter(|text| !text.trim().is_empty()) {
		prompt.push_str(&format!("\n\nAbout you: {description}"));
	}

	prompt
}

/// The first user message of an analysis run, carrying the draft and the
/// caller-supplied context.
pub fn analysis_query(draft: &str, context: &AnalysisContext) -> String {
	let mut query = String::from("Please analyze the following writing");

	if let Some(purpose) = context.purpose.as_ref().filter(|text| !text.trim().is_empty()) {
		query.push_str(&format!(" (Purpose: {purpose})"));
	}
	if !context.criteria.is_empty() {
		query.push_str(&format!("\nEvaluation criteria: {}", context.criteria.join(", ")));
	}

	query.push_str(&format!("\n\nText to analyze:\n{draft}"));
	query.push_str(
		"\n\nProvide specific, actionable feedback grounded in your corpus. Return your response \
		 as JSON as specified in your instructions.",
	);

	query
}

//! Plain-text prompt assembly for tutor requests.

use std::fmt::Write as _;

use crate::content::{Exercise, Spec};
use crate::llm::GenerateRequest;
use crate::model::{InterventionIntent, Run, Session, SessionIntent};

/// Largest chunk of run output copied into a prompt.
const MAX_OUTPUT_CHARS: usize = 4_000;

/// Snapshot handed to the model. Built under the session lock, used after it
/// is released.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub session: Session,
    pub exercise: Option<Exercise>,
    pub spec: Option<Spec>,
    pub last_run: Option<Run>,
    pub question: Option<String>,
}

fn level_guidance(intent: InterventionIntent, level: u8) -> &'static str {
    if intent == InterventionIntent::Review {
        return "Review the code like a senior colleague: point out bugs, unclear naming and missing tests. Do not rewrite it.";
    }
    match level {
        0 | 1 => "Give a one or two sentence nudge. Do not show code.",
        2 => "Explain the concept the learner is missing and point at the relevant lines. Short snippets only.",
        3 => "Walk through the approach step by step. You may show a small fragment, never the full solution.",
        4 => "Show a partial solution for the part the learner is stuck on and leave the rest to them.",
        _ => "Show a complete working solution and explain each change.",
    }
}

fn intent_goal(intent: InterventionIntent) -> &'static str {
    match intent {
        InterventionIntent::Hint => "The learner asked for a hint.",
        InterventionIntent::Review => "The learner asked for a code review.",
        InterventionIntent::Stuck => "The learner says they are stuck.",
        InterventionIntent::Next => "The learner wants to know what to do next.",
        InterventionIntent::Explain => "The learner wants an explanation.",
        InterventionIntent::Escalate => {
            "The learner escalated after earlier hints did not get them unstuck."
        }
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(
    ctx: &PromptContext,
    intent: InterventionIntent,
    level: u8,
    justification: Option<&str>,
) -> GenerateRequest {
    let mut system = String::from(
        "You are a patient programming tutor pairing with a learner. \
         Help them learn; do not do the work for them beyond what the help level allows.\n",
    );
    let _ = writeln!(system, "Help level {level}/5: {}", level_guidance(intent, level));
    if level >= 4 {
        system.push_str(
            "When you propose a whole file, put it in one fenced block whose info string is the language followed by the file name, e.g. ```go main.go\n",
        );
    }

    let mut prompt = String::new();
    let _ = writeln!(prompt, "{}", intent_goal(intent));
    if let Some(justification) = justification {
        let _ = writeln!(prompt, "Their reason: {}", justification.trim());
    }

    let session = &ctx.session;
    match session.intent {
        SessionIntent::Training => {
            if let Some(exercise) = &ctx.exercise {
                let _ = writeln!(prompt, "\n## Exercise: {}\n{}", exercise.title, exercise.description);
            }
        }
        SessionIntent::FeatureGuidance | SessionIntent::SpecAuthoring => {
            if let Some(spec) = &ctx.spec {
                let _ = writeln!(prompt, "\n## Spec: {}\n{}", spec.title, spec.body);
                for criterion in &spec.acceptance_criteria {
                    let mark = if criterion.satisfied { "x" } else { " " };
                    let _ = writeln!(prompt, "- [{mark}] {}", criterion.text);
                }
            }
            if session.intent == SessionIntent::SpecAuthoring {
                if let Some(section) = &session.authoring_section {
                    let _ = writeln!(prompt, "\nThe learner is writing the '{section}' section.");
                }
                if !session.authoring_docs.is_empty() {
                    let _ = writeln!(prompt, "Reference documents: {}", session.authoring_docs.join(", "));
                }
            }
        }
    }

    if !session.code.is_empty() {
        prompt.push_str("\n## Current code\n");
        for (name, content) in &session.code {
            let _ = writeln!(prompt, "```{name}\n{content}\n```");
        }
    }

    if let Some(result) = ctx.last_run.as_ref().and_then(|run| run.result.as_ref()) {
        prompt.push_str("\n## Latest run\n");
        for (label, step) in [
            ("format", &result.format),
            ("build", &result.build),
            ("test", &result.test),
        ] {
            if let Some(step) = step {
                let status = if step.ok { "ok" } else { "FAILED" };
                let _ = writeln!(prompt, "{label}: {status}");
                if !step.output.trim().is_empty() {
                    let _ = writeln!(prompt, "```\n{}\n```", truncate(step.output.trim()));
                }
            }
        }
    }

    if let Some(question) = ctx.question.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let _ = writeln!(prompt, "\n## Question\n{question}");
    }

    GenerateRequest {
        system: Some(system),
        prompt,
        model: None,
        max_tokens: None,
    }
}

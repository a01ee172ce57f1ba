//! Built-in prompt templates, one per content kind.

use std::sync::Arc;

use pipeline::{ContentKind, GenerationContext, PromptBuilder, PromptBuilders};

/// What a kind is for and how many units it asks for.
struct Brief {
    goal: &'static str,
    units: u32,
    has_subjects: bool,
}

fn brief(kind: ContentKind) -> Brief {
    match kind {
        ContentKind::WelcomeSequence => Brief {
            goal: "welcome new subscribers, set expectations and earn a first reply",
            units: 5,
            has_subjects: true,
        },
        ContentKind::NurtureSequence => Brief {
            goal: "build trust over several weeks with stories and useful advice",
            units: 7,
            has_subjects: true,
        },
        ContentKind::LaunchSequence => Brief {
            goal: "build anticipation for a launch, open the cart and close it",
            units: 6,
            has_subjects: true,
        },
        ContentKind::SalesSequence => Brief {
            goal: "convert warm subscribers into buyers without hard-sell pressure",
            units: 5,
            has_subjects: true,
        },
        ContentKind::SocialCampaign => Brief {
            goal: "promote the offer across a two-week run of short social posts",
            units: 10,
            has_subjects: false,
        },
    }
}

/// Template-driven [`PromptBuilder`] for a single content kind.
#[derive(Debug, Clone, Copy)]
pub struct TemplatePrompts {
    kind: ContentKind,
}

impl TemplatePrompts {
    pub fn new(kind: ContentKind) -> Self {
        Self { kind }
    }

    fn format_instructions(&self) -> String {
        let label = self.kind.unit_label();
        let b = brief(self.kind);
        let subjects = if b.has_subjects {
            "Subject Lines:\n1. <first option>\n2. <second option>\n3. <third option>\n"
        } else {
            ""
        };
        format!(
            "Write exactly {units} {label_lower}s. Start each one with a line `{label} <n>` \
             and use these labels:\n\n\
             {label} 1\n\
             Purpose: <one line>\n\
             Send Day: <days after the sequence starts>\n\
             {subjects}\
             Body:\n<the full text>\n\
             CTA: <one line>",
            units = b.units,
            label_lower = label.to_ascii_lowercase(),
        )
    }
}

impl PromptBuilder for TemplatePrompts {
    fn build_system_prompt(&self, context: &GenerationContext) -> String {
        let b = brief(self.kind);
        let mut prompt = format!(
            "You are a direct-response copywriter writing a {kind}. The goal is to {goal}. \
             Write like a person, not a brand: plain words, specific details, varied \
             sentence length, no filler.",
            kind = self.kind.as_str().replace('_', " "),
            goal = b.goal,
        );
        if !context.attributes.is_null() {
            let facts = serde_json::to_string_pretty(&context.attributes).unwrap_or_default();
            prompt.push_str("\n\nFacts about the business and offer:\n");
            prompt.push_str(&facts);
        }
        prompt
    }

    fn build_user_prompt(&self, context: &GenerationContext) -> String {
        let mut prompt = self.format_instructions();
        if !context.voice_samples.is_empty() {
            prompt.push_str("\n\nMatch the voice of these samples:\n");
            for sample in &context.voice_samples {
                prompt.push_str("---\n");
                prompt.push_str(sample);
                prompt.push('\n');
            }
        }
        prompt
    }

    fn build_critique_prompt(&self, draft: &str, voice_samples: &[String]) -> String {
        let mut prompt = String::from(
            "Critique the draft below as a demanding editor. For each unit, list concrete \
             problems: generic phrasing, claims without specifics, weak subject lines, \
             unclear calls to action, and anywhere it sounds machine-written. Do not rewrite it.",
        );
        if !voice_samples.is_empty() {
            prompt.push_str(" Also flag every place the voice drifts from the samples:\n");
            for sample in voice_samples {
                prompt.push_str("---\n");
                prompt.push_str(sample);
                prompt.push('\n');
            }
        }
        prompt.push_str("\n\nDRAFT:\n");
        prompt.push_str(draft);
        prompt
    }

    fn build_rewrite_prompt(
        &self,
        draft: &str,
        critique: &str,
        _context: &GenerationContext,
    ) -> String {
        format!(
            "Rewrite the draft so that every point in the critique is fixed. Keep the \
             structure.\n\n{instructions}\n\nDRAFT:\n{draft}\n\nCRITIQUE:\n{critique}",
            instructions = self.format_instructions(),
        )
    }

    fn build_refinement_prompt(&self, rewrite: &str, mean_score: f64, warnings: &[String]) -> String {
        let mut prompt = format!(
            "This copy scored {mean_score:.1}/10 on a check for machine-written text. \
             Revise it so it reads as written by a person. Keep every label and header \
             exactly as they are."
        );
        if !warnings.is_empty() {
            prompt.push_str("\n\nSpecific problems found:\n");
            for warning in warnings {
                prompt.push_str("- ");
                prompt.push_str(warning);
                prompt.push('\n');
            }
        }
        prompt.push_str("\n\nCOPY:\n");
        prompt.push_str(rewrite);
        prompt
    }
}

/// A registry with a [`TemplatePrompts`] for every kind.
pub fn registry() -> PromptBuilders {
    ContentKind::ALL
        .into_iter()
        .fold(PromptBuilders::new(), |builders, kind| {
            builders.with(kind, Arc::new(TemplatePrompts::new(kind)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{parse_units, ContextId};

    fn context() -> GenerationContext {
        GenerationContext {
            id: ContextId::new("ctx").unwrap(),
            voice_samples: vec!["We keep it short.".into()],
            attributes: serde_json::json!({ "product": "Field Notes" }),
        }
    }

    #[test]
    fn registry_covers_every_kind() {
        let builders = registry();
        for kind in ContentKind::ALL {
            assert!(builders.get(kind).is_some(), "{kind}");
        }
    }

    #[test]
    fn social_posts_use_post_headers_without_subjects() {
        let prompt = TemplatePrompts::new(ContentKind::SocialCampaign).build_user_prompt(&context());
        assert!(prompt.contains("POST 1"));
        assert!(!prompt.contains("Subject"));
    }

    #[test]
    fn format_example_is_itself_parseable() {
        let p = TemplatePrompts::new(ContentKind::WelcomeSequence);
        let instructions = p.format_instructions();
        let example = instructions
            .split_once("labels:\n\n")
            .map(|(_, ex)| ex)
            .unwrap();
        let units = parse_units(example, ContentKind::WelcomeSequence).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].subject_variants.len(), 3);
    }

    #[test]
    fn system_prompt_includes_attributes() {
        let prompt = TemplatePrompts::new(ContentKind::SalesSequence).build_system_prompt(&context());
        assert!(prompt.contains("Field Notes"));
        assert!(prompt.contains("sales sequence"));
    }

    #[test]
    fn refinement_lists_warnings() {
        let prompt = TemplatePrompts::new(ContentKind::LaunchSequence).build_refinement_prompt(
            "copy",
            4.25,
            &["stock phrase 'delve'".to_string()],
        );
        assert!(prompt.contains("4.2/10") || prompt.contains("4.3/10"));
        assert!(prompt.contains("- stock phrase 'delve'"));
        assert!(prompt.ends_with("copy"));
    }
}

//! Ordered substitution table that turns model chat-template markup into
//! short readable labels before text reaches the UI.
//!
//! Rules run in table order, each over the output of the previous one.
//! Several patterns overlap (the `<|from|>` family, the `<Assistant:>`
//! rewrites), so reordering the table changes the output.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex, RegexBuilder};

use crate::error::Result;

const ASSISTANT: &str = "<Assistant:>";
const FUNCTION_CALL: &str = "<Function Call:>";

/// One row of the built-in table.
struct RuleSpec {
    pattern: &'static str,
    replacement: &'static str,
    /// Skip the match when capture group 1 starts with one of these
    /// (case-insensitive).  Stands in for a negative lookahead.
    reject_group_prefixes: &'static [&'static str],
}

const BUILTIN_RULES: &[RuleSpec] = &[
    RuleSpec {
        pattern: r"<\|from\|> user.*\n<\|recipient\|> all.*\n<\|content\|>",
        replacement: "<User:> ",
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|from\|> assistant\n<\|recipient\|> (.*)<\|content\|>",
        replacement: FUNCTION_CALL,
        reject_group_prefixes: &["all"],
    },
    RuleSpec {
        pattern: r"<Assistant:><\|reserved_special_token_249\|>",
        replacement: FUNCTION_CALL,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<Assistant:><tool_call>",
        replacement: FUNCTION_CALL,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|from\|> assistant\n<\|recipient\|> all\n<\|content\|>",
        replacement: ASSISTANT,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|start_header_id\|>assistant<\|end_header_id\|>\n\n>>>all\n",
        replacement: ASSISTANT,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|start_header_id\|>assistant<\|end_header_id\|>\n\n",
        replacement: ASSISTANT,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|im_start\|>assistant\n",
        replacement: ASSISTANT,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|im_start\|>assistant<\|im_sep\|>\n",
        replacement: ASSISTANT,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|assistant\|>\n",
        replacement: ASSISTANT,
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|from\|> (.*)<\|recipient\|> all.*\n<\|content\|>",
        replacement: "<Function Response:> ",
        reject_group_prefixes: &["user", "assistant"],
    },
    RuleSpec {
        pattern: r"<\|stop\|>",
        replacement: "\n",
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|eot_id\|>",
        replacement: "\n",
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|eom_id\|>",
        replacement: "\n",
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|im_end\|>",
        replacement: "\n",
        reject_group_prefixes: &[],
    },
    RuleSpec {
        pattern: r"<\|end\|>",
        replacement: "\n",
        reject_group_prefixes: &[],
    },
];

/// A compiled substitution.
#[derive(Debug, Clone)]
pub struct FilterRule {
    regex: Regex,
    replacement: String,
    reject_group_prefixes: Vec<String>,
}

impl FilterRule {
    /// Compile a case-insensitive rule.  `reject_group_prefixes` only has an
    /// effect when the pattern has a first capture group.
    pub fn new(
        pattern: &str,
        replacement: impl Into<String>,
        reject_group_prefixes: &[&str],
    ) -> Result<Self> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            regex,
            replacement: replacement.into(),
            reject_group_prefixes: reject_group_prefixes
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        })
    }

    fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        if self.reject_group_prefixes.is_empty() {
            return self
                .regex
                .replace_all(text, regex::NoExpand(self.replacement.as_str()));
        }

        // A rejected match only rules out its start position; the search
        // resumes one character later, inside the rejected span.
        let mut out = String::new();
        let mut copied = 0;
        let mut pos = 0;
        while pos <= text.len() {
            let Some(caps) = self.regex.captures_at(text, pos) else {
                break;
            };
            let Some(whole) = caps.get(0) else {
                break;
            };
            if self.rejects(&caps) || whole.is_empty() {
                pos = next_char_boundary(text, whole.start());
                continue;
            }
            out.push_str(&text[copied..whole.start()]);
            out.push_str(&self.replacement);
            copied = whole.end();
            pos = whole.end();
        }

        if copied == 0 && out.is_empty() {
            return Cow::Borrowed(text);
        }
        out.push_str(&text[copied..]);
        Cow::Owned(out)
    }

    fn rejects(&self, caps: &Captures) -> bool {
        let group = caps
            .get(1)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        self.reject_group_prefixes
            .iter()
            .any(|prefix| group.starts_with(prefix.as_str()))
    }
}

fn next_char_boundary(text: &str, from: usize) -> usize {
    text[from..]
        .chars()
        .next()
        .map_or(text.len() + 1, |c| from + c.len_utf8())
}

/// The ordered filter.  Cheap to clone; the compiled table is shared.
#[derive(Debug, Clone)]
pub struct TextFilter {
    rules: Arc<[FilterRule]>,
}

impl TextFilter {
    /// Build a filter from a custom ordered table.
    pub fn with_rules(rules: Vec<FilterRule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    /// Apply every rule in order, each over the previous rule's output.
    pub fn filter(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in self.rules.iter() {
            let replaced = match rule.apply(&out) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(replaced) => replaced,
            };
            out = replaced;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for TextFilter {
    fn default() -> Self {
        static BUILTIN: OnceLock<Arc<[FilterRule]>> = OnceLock::new();
        let rules = BUILTIN.get_or_init(|| {
            BUILTIN_RULES
                .iter()
                .filter_map(|spec| {
                    FilterRule::new(spec.pattern, spec.replacement, spec.reject_group_prefixes)
                        .map_err(|e| {
                            tracing::error!(pattern = spec.pattern, error = %e, "bad built-in filter rule");
                        })
                        .ok()
                })
                .collect()
        });
        Self {
            rules: rules.clone(),
        }
    }
}

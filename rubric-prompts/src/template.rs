// Copyright 2025 Rubric Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Example-grounded prompt templates: definition, validation, rendering and
//! variable substitution.

use crate::PromptError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One few-shot example: a mapping from variable name to value, in
/// authoring order.
pub type Example = serde_json::Map<String, Value>;

/// How the model is expected to answer, which drives both brace escaping at
/// render time and the parse strategy applied to responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputKind {
    #[default]
    Json,
    Str,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Json => "json",
            OutputKind::Str => "str",
        }
    }
}

impl std::str::FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputKind::Json),
            "str" | "string" => Ok(OutputKind::Str),
            other => Err(format!("unknown output kind '{other}'")),
        }
    }
}

impl TryFrom<String> for OutputKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<OutputKind> for String {
    fn from(kind: OutputKind) -> Self {
        kind.as_str().to_string()
    }
}

/// The raw constructor arguments of a [`Prompt`].
///
/// A `PromptSpec` carries no guarantees; it becomes a usable template only
/// through [`Prompt::from_spec`], which runs full validation. This is also
/// the shape persisted by the prompt cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub name: String,
    pub instruction: String,
    #[serde(default)]
    pub examples: Vec<Example>,
    pub input_keys: Vec<String>,
    pub output_key: String,
    #[serde(default)]
    pub output_kind: OutputKind,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// A single violated construction invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    EmptyInstruction,
    EmptyInputKeys,
    EmptyOutputKey,
    /// An example passed to the builder was not a JSON object
    ExampleNotObject { example: usize },
    /// An example is missing a declared input key or the output key
    MissingVariable { example: usize, variable: String },
    /// A JSON-mode example's string output does not parse as JSON
    InvalidJsonOutput {
        example: usize,
        variable: String,
        reason: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyInstruction => write!(f, "instruction cannot be empty"),
            Violation::EmptyInputKeys => write!(f, "input_keys cannot be empty"),
            Violation::EmptyOutputKey => write!(f, "output_key cannot be empty"),
            Violation::ExampleNotObject { example } => {
                write!(f, "example {example} is not a JSON object")
            }
            Violation::MissingVariable { example, variable } => write!(
                f,
                "example {example} does not have the variable {variable} in the definition"
            ),
            Violation::InvalidJsonOutput {
                example,
                variable,
                reason,
            } => write!(
                f,
                "{variable} in example {example} is not in valid json format: {reason}"
            ),
        }
    }
}

/// Every invariant violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for violation in &self.violations {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{violation}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// A validated, immutable prompt template.
///
/// Construction always runs the full invariant check: every example must
/// define every input key and the output key, and in JSON output mode every
/// string-typed example output must itself be valid JSON text. Adaptation
/// (see [`crate::Adapter`]) never mutates a `Prompt`; it produces a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    spec: PromptSpec,
}

impl Prompt {
    /// Start building a prompt with the given name.
    pub fn builder(name: impl Into<String>) -> PromptBuilder {
        PromptBuilder::new(name)
    }

    /// Validate a spec and wrap it. Returns every violation found, not just
    /// the first.
    pub fn from_spec(spec: PromptSpec) -> Result<Self, ValidationReport> {
        let violations = validate(&spec);
        if violations.is_empty() {
            Ok(Self { spec })
        } else {
            Err(ValidationReport::new(violations))
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn instruction(&self) -> &str {
        &self.spec.instruction
    }

    pub fn examples(&self) -> &[Example] {
        &self.spec.examples
    }

    pub fn input_keys(&self) -> &[String] {
        &self.spec.input_keys
    }

    pub fn output_key(&self) -> &str {
        &self.spec.output_key
    }

    pub fn output_kind(&self) -> OutputKind {
        self.spec.output_kind
    }

    pub fn language(&self) -> &str {
        &self.spec.language
    }

    /// The underlying constructor arguments.
    pub fn spec(&self) -> &PromptSpec {
        &self.spec
    }

    /// Generate the prompt text: instruction, example block, one unresolved
    /// `{key}` slot per input key, and the completion cue for the output key.
    ///
    /// In JSON output mode every emitted example value has its braces doubled
    /// so it survives the single round of substitution done by [`format`].
    ///
    /// [`format`]: Prompt::format
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.spec.instruction);
        out.push('\n');

        for example in &self.spec.examples {
            for (key, value) in example {
                self.push_field(&mut out, key, value);
            }
            out.push('\n');
        }

        for key in &self.spec.input_keys {
            out.push('\n');
            out.push_str(key);
            out.push_str(": {");
            out.push_str(key);
            out.push('}');
        }
        out.push('\n');
        out.push_str(&self.spec.output_key);
        out.push_str(": \n");

        out
    }

    /// Render a single example's field block.
    pub fn example_str(&self, index: usize) -> Result<String, PromptError> {
        let example =
            self.spec
                .examples
                .get(index)
                .ok_or_else(|| PromptError::ExampleOutOfRange {
                    index,
                    len: self.spec.examples.len(),
                })?;
        let mut out = String::new();
        for (key, value) in example {
            self.push_field(&mut out, key, value);
        }
        Ok(out)
    }

    fn push_field(&self, out: &mut String, key: &str, value: &Value) {
        let text = canonical_text(value);
        out.push('\n');
        out.push_str(key);
        out.push_str(": ");
        match self.spec.output_kind {
            OutputKind::Json => out.push_str(&escape_braces(&text)),
            OutputKind::Str => out.push_str(&text),
        }
    }

    /// Substitute the input slots with caller-supplied values.
    ///
    /// The supplied key set must equal the declared input keys exactly; any
    /// missing or extra key fails with [`PromptError::ParameterMismatch`]
    /// naming both sets.
    pub fn format(&self, vars: &HashMap<String, String>) -> Result<PromptValue, PromptError> {
        let expected: HashSet<&str> = self.spec.input_keys.iter().map(String::as_str).collect();
        let received: HashSet<&str> = vars.keys().map(String::as_str).collect();
        if expected != received {
            let mut received: Vec<String> = vars.keys().cloned().collect();
            received.sort();
            return Err(PromptError::ParameterMismatch {
                expected: self.spec.input_keys.clone(),
                received,
            });
        }
        let prompt_str = substitute(&self.render(), vars)?;
        Ok(PromptValue { prompt_str })
    }
}

/// Canonical text form of an example value: strings verbatim, everything
/// else as compact JSON with non-ASCII characters preserved literally.
pub(crate) fn canonical_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            value.to_string()
        }
    }
}

fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// One round of `str.format`-style substitution: `{{` and `}}` collapse to
/// literal braces, `{name}` is replaced by the matching value verbatim.
fn substitute(template: &str, vars: &HashMap<String, String>) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if let Some(&(_, '{')) = chars.peek() {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for (_, c2) in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c2);
                }
                if !closed {
                    return Err(PromptError::UnmatchedBrace(pos));
                }
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => return Err(PromptError::UnknownVariable(name)),
                }
            }
            '}' => {
                if let Some(&(_, '}')) = chars.peek() {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(PromptError::UnmatchedBrace(pos));
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

fn validate(spec: &PromptSpec) -> Vec<Violation> {
    let mut violations = Vec::new();

    if spec.instruction.is_empty() {
        violations.push(Violation::EmptyInstruction);
    }
    if spec.input_keys.is_empty() {
        violations.push(Violation::EmptyInputKeys);
    }
    if spec.output_key.is_empty() {
        violations.push(Violation::EmptyOutputKey);
    }

    for (no, example) in spec.examples.iter().enumerate() {
        for key in &spec.input_keys {
            if !example.contains_key(key) {
                violations.push(Violation::MissingVariable {
                    example: no + 1,
                    variable: key.clone(),
                });
            }
        }
        match example.get(&spec.output_key) {
            None if !spec.output_key.is_empty() => {
                violations.push(Violation::MissingVariable {
                    example: no + 1,
                    variable: spec.output_key.clone(),
                });
            }
            Some(Value::String(text)) if spec.output_kind == OutputKind::Json => {
                if let Err(err) = serde_json::from_str::<Value>(text) {
                    violations.push(Violation::InvalidJsonOutput {
                        example: no + 1,
                        variable: spec.output_key.clone(),
                        reason: err.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    violations
}

/// Builder for [`Prompt`]; `build` runs the full validation pass.
pub struct PromptBuilder {
    name: String,
    instruction: String,
    examples: Vec<Value>,
    input_keys: Vec<String>,
    output_key: String,
    output_kind: OutputKind,
    language: String,
}

impl PromptBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: String::new(),
            examples: Vec::new(),
            input_keys: Vec::new(),
            output_key: String::new(),
            output_kind: OutputKind::default(),
            language: default_language(),
        }
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Append one example. The value must be a JSON object; anything else is
    /// reported as a violation at build time.
    pub fn example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }

    pub fn input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn output_kind(mut self, kind: OutputKind) -> Self {
        self.output_kind = kind;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn build(self) -> Result<Prompt, ValidationReport> {
        let mut violations = Vec::new();
        let mut examples = Vec::with_capacity(self.examples.len());
        for (no, value) in self.examples.into_iter().enumerate() {
            match value {
                Value::Object(map) => examples.push(map),
                _ => violations.push(Violation::ExampleNotObject { example: no + 1 }),
            }
        }

        let spec = PromptSpec {
            name: self.name,
            instruction: self.instruction,
            examples,
            input_keys: self.input_keys,
            output_key: self.output_key,
            output_kind: self.output_kind,
            language: self.language,
        };
        violations.extend(validate(&spec));

        if violations.is_empty() {
            Ok(Prompt { spec })
        } else {
            Err(ValidationReport::new(violations))
        }
    }
}

/// The rendered, fully substituted prompt text, ready to be sent to the
/// model once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptValue {
    prompt_str: String,
}

impl PromptValue {
    pub fn as_str(&self) -> &str {
        &self.prompt_str
    }

    pub fn into_string(self) -> String {
        self.prompt_str
    }

    /// Reconstruct the prompt as a user chat message.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: ChatRole::User,
            content: self.prompt_str.clone(),
        }
    }
}

impl fmt::Display for PromptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prompt_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn question_prompt() -> Prompt {
        Prompt::builder("question_generation")
            .instruction("Generate a question for the given answer")
            .example(json!({
                "answer": "Everest",
                "output": {"question": "What is the tallest mountain on Earth?"},
            }))
            .input_keys(["answer"])
            .output_key("output")
            .output_kind(OutputKind::Json)
            .build()
            .unwrap()
    }

    #[test]
    fn render_emits_examples_slots_and_cue() {
        let rendered = question_prompt().render();
        assert_eq!(
            rendered,
            "Generate a question for the given answer\n\
             \n\
             answer: Everest\n\
             output: {{\"question\":\"What is the tallest mountain on Earth?\"}}\n\
             \n\
             answer: {answer}\n\
             output: \n"
        );
    }

    #[test]
    fn render_without_examples_is_just_slots_and_cue() {
        let prompt = Prompt::builder("bare")
            .instruction("Answer the question")
            .input_keys(["question"])
            .output_key("answer")
            .build()
            .unwrap();
        assert_eq!(
            prompt.render(),
            "Answer the question\n\nquestion: {question}\nanswer: \n"
        );
    }

    #[test]
    fn format_substitutes_slots_and_unescapes_braces() {
        let vars = HashMap::from([("answer".to_string(), "K2".to_string())]);
        let value = question_prompt().format(&vars).unwrap();
        assert_eq!(
            value.as_str(),
            "Generate a question for the given answer\n\
             \n\
             answer: Everest\n\
             output: {\"question\":\"What is the tallest mountain on Earth?\"}\n\
             \n\
             answer: K2\n\
             output: \n"
        );
    }

    #[test]
    fn format_with_exact_keys_never_mismatches() {
        let prompt = Prompt::builder("two_keys")
            .instruction("Do the thing")
            .input_keys(["a", "b"])
            .output_key("out")
            .build()
            .unwrap();
        let vars = HashMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        // order-independent: any permutation of the exact key set works
        assert!(prompt.format(&vars).is_ok());
    }

    #[test]
    fn format_rejects_missing_and_extra_keys() {
        let prompt = Prompt::builder("two_keys")
            .instruction("Do the thing")
            .input_keys(["a", "b"])
            .output_key("out")
            .build()
            .unwrap();

        let missing = HashMap::from([("a".to_string(), "1".to_string())]);
        match prompt.format(&missing) {
            Err(PromptError::ParameterMismatch { expected, received }) => {
                assert_eq!(expected, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(received, vec!["a".to_string()]);
            }
            other => panic!("expected parameter mismatch, got {other:?}"),
        }

        let extra = HashMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ]);
        assert!(matches!(
            prompt.format(&extra),
            Err(PromptError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn json_mode_doubles_braces_and_round_trips() {
        let prompt = question_prompt();
        let example_block = prompt.example_str(0).unwrap();
        assert!(example_block.contains("{{\"question\""));
        // halving the doubled braces reproduces the serialized value
        let unescaped = example_block.replace("{{", "{").replace("}}", "}");
        assert!(unescaped.contains("{\"question\":\"What is the tallest mountain on Earth?\"}"));
    }

    #[test]
    fn string_mode_leaves_values_untouched() {
        let prompt = Prompt::builder("translation")
            .instruction("Language translation")
            .example(json!({"input": "plain text", "output": "texte brut"}))
            .input_keys(["input"])
            .output_key("output")
            .output_kind(OutputKind::Str)
            .build()
            .unwrap();
        assert!(prompt.render().contains("\ninput: plain text"));
        assert!(!prompt.render().contains("{{"));
    }

    #[test]
    fn non_ascii_values_are_preserved_literally() {
        let prompt = Prompt::builder("translation")
            .instruction("Language translation")
            .example(json!({
                "input": "Who was Albert Einstein?",
                "output": {"text": "अल्बर्ट आइंस्टीन कौन थे?"},
            }))
            .input_keys(["input"])
            .output_key("output")
            .build()
            .unwrap();
        assert!(prompt.render().contains("अल्बर्ट आइंस्टीन कौन थे?"));
    }

    #[test]
    fn validation_reports_missing_variables() {
        let err = Prompt::builder("broken")
            .instruction("Judge the answer")
            .example(json!({"answer": "yes"}))
            .input_keys(["question", "answer"])
            .output_key("verdict")
            .build()
            .unwrap_err();
        assert_eq!(
            err.violations(),
            &[
                Violation::MissingVariable {
                    example: 1,
                    variable: "question".to_string()
                },
                Violation::MissingVariable {
                    example: 1,
                    variable: "verdict".to_string()
                },
            ]
        );
    }

    #[test]
    fn validation_rejects_invalid_json_output() {
        let err = Prompt::builder("broken")
            .instruction("Judge the answer")
            .example(json!({"question": "q", "output": "{not valid json"}))
            .input_keys(["question"])
            .output_key("output")
            .output_kind(OutputKind::Json)
            .build()
            .unwrap_err();
        assert!(matches!(
            err.violations(),
            [Violation::InvalidJsonOutput { example: 1, .. }]
        ));
        assert!(err.to_string().contains("example 1"));
    }

    #[test]
    fn validation_collects_every_violation_in_one_pass() {
        let err = Prompt::builder("broken")
            .instruction("")
            .output_key("")
            .build()
            .unwrap_err();
        assert_eq!(
            err.violations(),
            &[
                Violation::EmptyInstruction,
                Violation::EmptyInputKeys,
                Violation::EmptyOutputKey,
            ]
        );
    }

    #[test]
    fn validation_rejects_non_object_examples() {
        let err = Prompt::builder("broken")
            .instruction("Judge the answer")
            .example(json!("just a string"))
            .input_keys(["question"])
            .output_key("output")
            .build()
            .unwrap_err();
        assert!(err
            .violations()
            .contains(&Violation::ExampleNotObject { example: 1 }));
    }

    #[test]
    fn string_output_kind_skips_json_check() {
        let prompt = Prompt::builder("translation")
            .instruction("Language translation")
            .example(json!({"input": "hello", "output": "{not valid json"}))
            .input_keys(["input"])
            .output_key("output")
            .output_kind(OutputKind::Str)
            .build();
        assert!(prompt.is_ok());
    }

    #[test]
    fn example_str_out_of_range_names_the_index() {
        let err = question_prompt().example_str(5).unwrap_err();
        assert!(matches!(
            err,
            PromptError::ExampleOutOfRange { index: 5, len: 1 }
        ));
    }

    #[test]
    fn output_kind_parses_case_insensitively() {
        assert_eq!("JSON".parse::<OutputKind>().unwrap(), OutputKind::Json);
        assert_eq!("json".parse::<OutputKind>().unwrap(), OutputKind::Json);
        assert_eq!("Str".parse::<OutputKind>().unwrap(), OutputKind::Str);
        assert!("yaml".parse::<OutputKind>().is_err());
    }

    #[test]
    fn prompt_value_converts_to_user_message() {
        let vars = HashMap::from([("answer".to_string(), "K2".to_string())]);
        let value = question_prompt().format(&vars).unwrap();
        let message = value.to_message();
        assert_eq!(message.role, ChatRole::User);
        assert_eq!(message.content, value.as_str());
    }
}

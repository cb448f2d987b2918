// Question payloads, one variant per answer mode.
//
// The live control state stores only what participants and displays need
// to render the question — never answers. Raw payloads are normalized and
// validated here, at the boundary, before anything reaches the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PollError, PollResult};
use crate::types::AnswerMode;

/// One selectable choice of a multi question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub label: String,
}

/// Normalized question payload, keyed by the answer mode it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Question {
    Multi {
        choices: Vec<Choice>,
        #[serde(default)]
        text: Option<String>,
    },
    Likert {
        #[serde(default)]
        text: Option<String>,
    },
    Open {
        #[serde(default)]
        text: Option<String>,
    },
    Wordcloud {
        #[serde(default)]
        text: Option<String>,
    },
}

impl Question {
    pub fn mode(&self) -> AnswerMode {
        match self {
            Self::Multi { .. } => AnswerMode::Multi,
            Self::Likert { .. } => AnswerMode::Likert,
            Self::Open { .. } => AnswerMode::Open,
            Self::Wordcloud { .. } => AnswerMode::Wordcloud,
        }
    }

    /// Normalize a raw payload for `mode`.
    ///
    /// `None` (or JSON null) means "no question": valid, and stored as
    /// null. Multi requires at least two choices with non-empty ids and
    /// labels. Other modes keep only the prompt text; an empty payload
    /// normalizes back to `None`.
    pub fn normalize(mode: AnswerMode, raw: Option<&Value>) -> PollResult<Option<Self>> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        };

        if mode == AnswerMode::Multi {
            return Ok(Some(Self::normalize_multi(raw)?));
        }

        if !raw.is_object() {
            return Err(PollError::InvalidInput("question must be an object".into()));
        }
        let text = raw.get("text").and_then(text_field);
        if text.is_none() {
            return Ok(None);
        }

        Ok(Some(match mode {
            AnswerMode::Likert => Self::Likert { text },
            AnswerMode::Open => Self::Open { text },
            AnswerMode::Wordcloud => Self::Wordcloud { text },
            AnswerMode::Multi => unreachable!("handled above"),
        }))
    }

    fn normalize_multi(raw: &Value) -> PollResult<Self> {
        let choices = raw
            .get("choices")
            .and_then(Value::as_array)
            .ok_or_else(|| PollError::InvalidInput("multi requires a choices array".into()))?;
        if choices.len() < 2 {
            return Err(PollError::InvalidInput("multi requires at least 2 choices".into()));
        }

        let mut normalized = Vec::with_capacity(choices.len());
        for (index, choice) in choices.iter().enumerate() {
            let row = index + 1;
            let id = choice
                .get("id")
                .and_then(text_field)
                .ok_or_else(|| PollError::InvalidInput(format!("choice {row} is missing an id")))?;
            let label = choice.get("label").and_then(text_field).ok_or_else(|| {
                PollError::InvalidInput(format!("choice {row} is missing a label"))
            })?;
            normalized.push(Choice { id, label });
        }

        let text = raw.get("text").and_then(text_field);
        Ok(Self::Multi { choices: normalized, text })
    }
}

/// Trimmed string content of a JSON field; empty or non-string is `None`.
fn text_field(value: &Value) -> Option<String> {
    let trimmed = value.as_str()?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

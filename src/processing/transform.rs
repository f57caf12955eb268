//! Pure text transformations keyed by processing type.

use std::collections::HashMap;

use regex::Regex;

use crate::error::ProcessError;
use crate::storage::ProcessingType;

/// A validated transformation request.
///
/// Parameters arrive as a heterogeneous string-to-JSON map; [`parse`]
/// converts them into a tagged variant so everything downstream works with
/// typed data. Parsing is the single validation point: after it succeeds,
/// [`apply`] cannot fail.
///
/// [`parse`]: TransformRequest::parse
/// [`apply`]: TransformRequest::apply
#[derive(Debug, Clone)]
pub enum TransformRequest {
    /// Count whitespace-separated runs.
    WordCount,
    /// Count lines; an unterminated trailing line counts.
    LineCount,
    /// Unicode-aware uppercasing.
    Uppercase,
    /// Unicode-aware lowercasing.
    Lowercase,
    /// Replace every non-overlapping literal occurrence of `find`.
    Replace { find: String, replace_with: String },
    /// Collect all regex matches in document order, joined by newlines.
    Extract { pattern: Regex },
}

fn string_param<'a>(
    parameters: &'a HashMap<String, serde_json::Value>,
    name: &str,
) -> Option<&'a str> {
    parameters.get(name).and_then(|v| v.as_str())
}

impl TransformRequest {
    /// Validates a parameter map against the requested processing type.
    pub fn parse(
        processing_type: ProcessingType,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Self, ProcessError> {
        match processing_type {
            ProcessingType::WordCount => Ok(TransformRequest::WordCount),
            ProcessingType::LineCount => Ok(TransformRequest::LineCount),
            ProcessingType::Uppercase => Ok(TransformRequest::Uppercase),
            ProcessingType::Lowercase => Ok(TransformRequest::Lowercase),
            ProcessingType::Replace => {
                let find = match string_param(parameters, "find") {
                    Some(find) if !find.is_empty() => find.to_string(),
                    _ => {
                        return Err(ProcessError::InvalidParameter {
                            name: "find".to_string(),
                            reason: "missing or empty".to_string(),
                        })
                    }
                };
                let replace_with = match string_param(parameters, "replace_with") {
                    Some(replace_with) => replace_with.to_string(),
                    None => {
                        return Err(ProcessError::InvalidParameter {
                            name: "replace_with".to_string(),
                            reason: "missing or not a string".to_string(),
                        })
                    }
                };
                Ok(TransformRequest::Replace { find, replace_with })
            }
            ProcessingType::Extract => {
                let pattern = match string_param(parameters, "pattern") {
                    Some(pattern) if !pattern.is_empty() => pattern,
                    _ => {
                        return Err(ProcessError::InvalidParameter {
                            name: "pattern".to_string(),
                            reason: "missing or empty".to_string(),
                        })
                    }
                };
                let pattern = Regex::new(pattern).map_err(|source| {
                    ProcessError::RegexCompile {
                        pattern: pattern.to_string(),
                        source,
                    }
                })?;
                Ok(TransformRequest::Extract { pattern })
            }
        }
    }

    /// Applies the transformation to in-memory content.
    pub fn apply(&self, content: &str) -> String {
        match self {
            TransformRequest::WordCount => content.split_whitespace().count().to_string(),
            TransformRequest::LineCount => content.lines().count().to_string(),
            TransformRequest::Uppercase => content.to_uppercase(),
            TransformRequest::Lowercase => content.to_lowercase(),
            TransformRequest::Replace { find, replace_with } => {
                content.replace(find.as_str(), replace_with)
            }
            TransformRequest::Extract { pattern } => pattern
                .find_iter(content)
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

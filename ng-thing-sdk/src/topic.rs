//! MQTT-style topic expressions.
//!
//! - `+` matches exactly one level
//! - `#` matches zero or more trailing levels and must be the last level

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicFilterError {
    #[error("Topic expression cannot be empty")]
    Empty,
    #[error("Multi-level wildcard (#) must be the last level")]
    MultiLevelNotLast,
    #[error("Wildcards (+, #) cannot share a level with literal text")]
    MixedWildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    Single,
    Multi,
}

/// A parsed topic expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    expression: String,
    levels: Vec<Level>,
}

impl TopicFilter {
    pub fn new(expression: &str) -> Result<Self, TopicFilterError> {
        if expression.is_empty() {
            return Err(TopicFilterError::Empty);
        }
        let raw: Vec<&str> = expression.split('/').collect();
        let last = raw.len() - 1;
        let mut levels = Vec::with_capacity(raw.len());
        for (index, level) in raw.into_iter().enumerate() {
            let level = match level {
                "+" => Level::Single,
                "#" if index == last => Level::Multi,
                "#" => return Err(TopicFilterError::MultiLevelNotLast),
                literal if literal.contains(|c: char| c == '+' || c == '#') => {
                    return Err(TopicFilterError::MixedWildcard)
                }
                literal => Level::Literal(literal.to_string()),
            };
            levels.push(level);
        }
        Ok(Self {
            expression: expression.to_string(),
            levels,
        })
    }

    #[inline]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            match level {
                // `sensor/#` also matches the parent `sensor`
                Level::Multi => return true,
                Level::Single => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Literal(literal) => match topic_levels.next() {
                    Some(part) if part == literal => {}
                    _ => return false,
                },
            }
        }
        topic_levels.next().is_none()
    }
}

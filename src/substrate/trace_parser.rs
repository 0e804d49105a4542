//! Tokenizes a working-memory trace transcript into reinforcement tags,
//! node/link formation blocks, and sub-entity activation marks.
//!
//! ```text
//! [abc123: very useful]
//! [NODE_FORMATION: Principle]
//! name: Least privilege by default
//! description: Grant only the access a task needs, nothing more.
//! [entity: felix]
//! ```

use std::collections::HashMap;

/// One `[<node_id>: <grade>]` reinforcement tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ReinforcementTag {
    pub node_id: String,
    pub grade: String,
}

/// One `[NODE_FORMATION: <Type>]` or `[LINK_FORMATION: <Type>]` block,
/// with its `key: value` lines collected verbatim — `FormationRouter`
/// decides what to do with an unrecognized `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormationBlock {
    pub is_link: bool,
    pub kind: String,
    pub fields: HashMap<String, String>,
}

/// An `[entity: <id>]` activation mark, scoped to whatever
/// tag/formation most recently preceded it in the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMark {
    pub entity_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTrace {
    pub reinforcements: Vec<ReinforcementTag>,
    pub formations: Vec<FormationBlock>,
    pub entity_marks: Vec<EntityMark>,
}

pub struct TraceParser;

impl TraceParser {
    /// Parse a raw trace transcript line by line. Unrecognized lines are
    /// ignored rather than erroring — a trace is free-form prose with
    /// tags interspersed, not a strict grammar.
    pub fn parse(text: &str) -> ParsedTrace {
        let mut trace = ParsedTrace::default();
        let mut current_formation: Option<FormationBlock> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(tag) = parse_bracket_tag(line) {
                if let Some(block) = current_formation.take() {
                    trace.formations.push(block);
                }
                match tag.as_str() {
                    _ if tag.starts_with("NODE_FORMATION:") => {
                        current_formation = Some(FormationBlock {
                            is_link: false,
                            kind: tag["NODE_FORMATION:".len()..].trim().to_string(),
                            fields: HashMap::new(),
                        });
                        continue;
                    }
                    _ if tag.starts_with("LINK_FORMATION:") => {
                        current_formation = Some(FormationBlock {
                            is_link: true,
                            kind: tag["LINK_FORMATION:".len()..].trim().to_string(),
                            fields: HashMap::new(),
                        });
                        continue;
                    }
                    _ if tag.starts_with("entity:") => {
                        trace.entity_marks.push(EntityMark {
                            entity_id: tag["entity:".len()..].trim().to_string(),
                        });
                        continue;
                    }
                    _ => {
                        if let Some((node_id, grade)) = tag.split_once(':') {
                            trace.reinforcements.push(ReinforcementTag {
                                node_id: node_id.trim().to_string(),
                                grade: grade.trim().to_string(),
                            });
                        }
                        continue;
                    }
                }
            }

            if let Some(block) = current_formation.as_mut() {
                if let Some((key, value)) = line.split_once(':') {
                    block.fields.insert(key.trim().to_string(), value.trim().to_string());
                    continue;
                }
            }
        }

        if let Some(block) = current_formation.take() {
            trace.formations.push(block);
        }

        trace
    }
}

/// Returns the contents of a leading `[...]` bracketed tag, if `line`
/// starts with one. Tags are embedded in prose (`[id: grade] Applied it
/// to the new service account.`), not given their own line, so only the
/// first `[...]` pair is taken and anything after the closing `]` is
/// ignored rather than requiring it to end the line. Formation `key:
/// value` field lines never start with `[`, so they are unaffected.
fn parse_bracket_tag(line: &str) -> Option<String> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
The session opened with a review of the incident.

[abc123: very useful]
[NODE_FORMATION: Principle]
name: Least privilege by default
description: Grant only the access a task needs, nothing more.

[entity: felix]

[LINK_FORMATION: Enables]
source: abc123
target: def456
strength: 0.8
"#;

    #[test]
    fn parses_reinforcement_tags() {
        let trace = TraceParser::parse(FIXTURE);
        assert_eq!(
            trace.reinforcements,
            vec![ReinforcementTag { node_id: "abc123".into(), grade: "very useful".into() }]
        );
    }

    #[test]
    fn parses_node_formation_fields() {
        let trace = TraceParser::parse(FIXTURE);
        let node_formation = trace.formations.iter().find(|f| !f.is_link).unwrap();
        assert_eq!(node_formation.kind, "Principle");
        assert_eq!(node_formation.fields.get("name").unwrap(), "Least privilege by default");
    }

    #[test]
    fn parses_link_formation_fields() {
        let trace = TraceParser::parse(FIXTURE);
        let link_formation = trace.formations.iter().find(|f| f.is_link).unwrap();
        assert_eq!(link_formation.kind, "Enables");
        assert_eq!(link_formation.fields.get("strength").unwrap(), "0.8");
    }

    #[test]
    fn parses_entity_marks() {
        let trace = TraceParser::parse(FIXTURE);
        assert_eq!(trace.entity_marks, vec![EntityMark { entity_id: "felix".into() }]);
    }

    #[test]
    fn ignores_free_prose() {
        let trace = TraceParser::parse("Just some narration with no tags at all.");
        assert!(trace.reinforcements.is_empty());
        assert!(trace.formations.is_empty());
    }

    #[test]
    fn parses_reinforcement_tag_embedded_in_prose() {
        let trace = TraceParser::parse(
            "[least_privilege: very useful] Applied it to the new service account.",
        );
        assert_eq!(
            trace.reinforcements,
            vec![ReinforcementTag { node_id: "least_privilege".into(), grade: "very useful".into() }]
        );
    }
}

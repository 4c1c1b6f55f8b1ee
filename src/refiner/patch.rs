//! Typed patch operations and their atomic application

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dom::{parse_children_for, Document};
use super::selector::{Selector, SelectorError};
use crate::metrics::PATCHES_APPLIED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Before,
    After,
    #[default]
    Append,
    Prepend,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassChange {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// `class` edits plus plain attributes; a `null` value removes the attribute
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassChange>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl StyleAttributes {
    fn is_empty(&self) -> bool {
        let no_class = self
            .class
            .as_ref()
            .map(|c| c.add.is_empty() && c.remove.is_empty())
            .unwrap_or(true);
        no_class && self.other.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PatchOperation {
    Add {
        selector: String,
        #[serde(default)]
        position: Position,
        content: String,
    },
    Update {
        selector: String,
        content: String,
    },
    Remove {
        selector: String,
    },
    Style {
        selector: String,
        #[serde(default)]
        attributes: Option<StyleAttributes>,
        /// Inline `style` attribute value
        #[serde(default)]
        content: Option<String>,
    },
}

impl PatchOperation {
    pub fn selector(&self) -> &str {
        match self {
            PatchOperation::Add { selector, .. }
            | PatchOperation::Update { selector, .. }
            | PatchOperation::Remove { selector }
            | PatchOperation::Style { selector, .. } => selector,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PatchOperation::Add { .. } => "add",
            PatchOperation::Update { .. } => "update",
            PatchOperation::Remove { .. } => "remove",
            PatchOperation::Style { .. } => "style",
        }
    }
}

/// Why a patch list was rejected; `index` is the failing operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("operation {index}: {source}")]
    InvalidSelector {
        index: usize,
        #[source]
        source: SelectorError,
    },
    #[error("operation {index}: selector '{selector}' matched no element")]
    NoMatch { index: usize, selector: String },
    #[error("operation {index}: selector '{selector}' matched {count} elements, expected exactly one")]
    Ambiguous {
        index: usize,
        selector: String,
        count: usize,
    },
    #[error("operation {index}: style on '{selector}' needs attributes or content")]
    EmptyStyle { index: usize, selector: String },
    #[error("operation {index}: {reason}")]
    Invalid { index: usize, reason: String },
    #[error("empty operation list")]
    Empty,
}

/// Apply every operation in order, or none of them
///
/// Each selector is resolved against the document as left by the previous
/// operations and must match exactly one element.
pub fn apply_patch(document: &str, operations: &[PatchOperation]) -> Result<String, PatchError> {
    let result = apply_all(document, operations);
    let outcome = if result.is_ok() { "applied" } else { "rejected" };
    PATCHES_APPLIED.with_label_values(&[outcome]).inc();
    result
}

fn apply_all(document: &str, operations: &[PatchOperation]) -> Result<String, PatchError> {
    if operations.is_empty() {
        return Err(PatchError::Empty);
    }
    let mut doc = Document::parse(document);
    for (index, op) in operations.iter().enumerate() {
        apply_one(&mut doc, index, op)?;
    }
    Ok(doc.to_html())
}

fn resolve(doc: &Document, index: usize, selector: &str) -> Result<Vec<usize>, PatchError> {
    let parsed = Selector::parse(selector).map_err(|source| PatchError::InvalidSelector { index, source })?;
    let mut matches = parsed.select(doc);
    match matches.len() {
        0 => Err(PatchError::NoMatch {
            index,
            selector: selector.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        count => Err(PatchError::Ambiguous {
            index,
            selector: selector.to_string(),
            count,
        }),
    }
}

fn apply_one(doc: &mut Document, index: usize, op: &PatchOperation) -> Result<(), PatchError> {
    if let PatchOperation::Style {
        selector,
        attributes,
        content,
    } = op
    {
        let no_attrs = attributes.as_ref().map(StyleAttributes::is_empty).unwrap_or(true);
        if no_attrs && content.is_none() {
            return Err(PatchError::EmptyStyle {
                index,
                selector: selector.clone(),
            });
        }
    }

    let path = resolve(doc, index, op.selector())?;
    let lost = || PatchError::Invalid {
        index,
        reason: "resolved node disappeared".to_string(),
    };

    match op {
        PatchOperation::Add { position, content, .. } => match position {
            Position::Append | Position::Prepend => {
                let el = doc.element_mut(&path).ok_or_else(lost)?;
                if el.is_void() {
                    return Err(PatchError::Invalid {
                        index,
                        reason: format!("<{}> cannot contain children", el.name),
                    });
                }
                let nodes = parse_children_for(&el.name, content);
                if *position == Position::Append {
                    el.children.extend(nodes);
                } else {
                    el.children.splice(0..0, nodes);
                }
                el.has_end_tag = true;
                el.self_closing = false;
            }
            Position::Before | Position::After | Position::Replace => {
                let (siblings, parent, at) = doc.siblings_mut(&path).ok_or_else(lost)?;
                let nodes = match parent {
                    Some(name) => parse_children_for(&name, content),
                    None => parse_children_for("", content),
                };
                match position {
                    Position::Before => {
                        siblings.splice(at..at, nodes);
                    }
                    Position::After => {
                        siblings.splice(at + 1..at + 1, nodes);
                    }
                    _ => {
                        siblings.splice(at..at + 1, nodes);
                    }
                }
            }
        },
        PatchOperation::Update { content, .. } => {
            let el = doc.element_mut(&path).ok_or_else(lost)?;
            if el.is_void() {
                return Err(PatchError::Invalid {
                    index,
                    reason: format!("<{}> has no inner content", el.name),
                });
            }
            el.set_inner_html(content);
        }
        PatchOperation::Remove { .. } => {
            let (siblings, _, at) = doc.siblings_mut(&path).ok_or_else(lost)?;
            siblings.remove(at);
        }
        PatchOperation::Style {
            attributes, content, ..
        } => {
            let el = doc.element_mut(&path).ok_or_else(lost)?;
            if let Some(attrs) = attributes {
                if let Some(change) = &attrs.class {
                    let mut classes: Vec<String> = el
                        .classes()
                        .into_iter()
                        .filter(|c| !change.remove.iter().any(|r| r == c))
                        .map(str::to_string)
                        .collect();
                    for add in &change.add {
                        if !classes.contains(add) {
                            classes.push(add.clone());
                        }
                    }
                    if classes.is_empty() {
                        el.remove_attr("class");
                    } else {
                        el.set_attr("class", &classes.join(" "));
                    }
                }
                for (name, value) in &attrs.other {
                    let name = name.to_ascii_lowercase();
                    match value {
                        Value::Null => el.remove_attr(&name),
                        Value::String(s) => el.set_attr(&name, s),
                        other => el.set_attr(&name, &other.to_string()),
                    }
                }
            }
            if let Some(style) = content {
                el.set_attr("style", style);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(value: serde_json::Value) -> Vec<PatchOperation> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_style_swaps_class() {
        let patch = ops(json!([{
            "type": "style",
            "selector": "header",
            "attributes": {"class": {"add": ["sticky"], "remove": ["static"]}}
        }]));
        let out = apply_patch("<header class=\"static\"></header>", &patch).unwrap();
        assert_eq!(out, "<header class=\"sticky\"></header>");
    }

    #[test]
    fn test_style_sets_and_removes_attributes() {
        let patch = ops(json!([{
            "type": "style",
            "selector": "a",
            "attributes": {"target": "_blank", "title": null, "tabindex": 0},
            "content": "color: red"
        }]));
        let out = apply_patch("<a href=\"/\" title=\"x\">Go</a>", &patch).unwrap();
        assert_eq!(out, "<a href=\"/\" tabindex=\"0\" target=\"_blank\" style=\"color: red\">Go</a>");
    }

    #[test]
    fn test_add_positions() {
        let base = "<ul><li id=\"b\">B</li></ul>";
        let cases = [
            ("before", "<ul><li>A</li><li id=\"b\">B</li></ul>"),
            ("after", "<ul><li id=\"b\">B</li><li>A</li></ul>"),
            ("replace", "<ul><li>A</li></ul>"),
        ];
        for (position, expected) in cases {
            let patch = ops(json!([{"type": "add", "selector": "#b", "position": position, "content": "<li>A</li>"}]));
            assert_eq!(apply_patch(base, &patch).unwrap(), expected, "position {}", position);
        }

        let patch = ops(json!([{"type": "add", "selector": "ul", "position": "prepend", "content": "<li>0</li>"}]));
        assert_eq!(
            apply_patch(base, &patch).unwrap(),
            "<ul><li>0</li><li id=\"b\">B</li></ul>"
        );
        let patch = ops(json!([{"type": "add", "selector": "ul", "content": "<li>Z</li>"}]));
        assert_eq!(
            apply_patch(base, &patch).unwrap(),
            "<ul><li id=\"b\">B</li><li>Z</li></ul>"
        );
    }

    #[test]
    fn test_update_and_remove() {
        let patch = ops(json!([
            {"type": "update", "selector": "h1", "content": "Fresh <em>bread</em>"},
            {"type": "remove", "selector": "p.old"}
        ]));
        let out = apply_patch("<h1>Bread</h1><p class=\"old\">bye</p><p>stay</p>", &patch).unwrap();
        assert_eq!(out, "<h1>Fresh <em>bread</em></h1><p>stay</p>");
    }

    #[test]
    fn test_later_operations_see_earlier_ones() {
        let patch = ops(json!([
            {"type": "add", "selector": "main", "content": "<section id=\"new\"></section>"},
            {"type": "update", "selector": "#new", "content": "hi"}
        ]));
        let out = apply_patch("<main></main>", &patch).unwrap();
        assert_eq!(out, "<main><section id=\"new\">hi</section></main>");
    }

    #[test]
    fn test_failure_is_atomic() {
        let doc = "<div><p>one</p><p>two</p></div>";
        let patch = ops(json!([
            {"type": "update", "selector": "div", "content": "changed"},
            {"type": "remove", "selector": "p"}
        ]));
        // `div` update empties the paragraphs, so `p` no longer matches
        assert!(matches!(
            apply_patch(doc, &patch),
            Err(PatchError::NoMatch { index: 1, .. })
        ));

        let ambiguous = ops(json!([{"type": "remove", "selector": "p"}]));
        assert!(matches!(
            apply_patch(doc, &ambiguous),
            Err(PatchError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn test_style_without_changes_rejected() {
        let patch = ops(json!([{"type": "style", "selector": "div"}]));
        assert!(matches!(
            apply_patch("<div></div>", &patch),
            Err(PatchError::EmptyStyle { .. })
        ));
        let patch = ops(json!([{"type": "style", "selector": "div", "attributes": {}}]));
        assert!(apply_patch("<div></div>", &patch).is_err());
    }

    #[test]
    fn test_invalid_and_empty() {
        assert_eq!(apply_patch("<div></div>", &[]), Err(PatchError::Empty));
        let patch = ops(json!([{"type": "update", "selector": "img", "content": "x"}]));
        assert!(matches!(
            apply_patch("<img src=\"a.png\">", &patch),
            Err(PatchError::Invalid { .. })
        ));
        let patch = ops(json!([{"type": "remove", "selector": "div >"}]));
        assert!(matches!(
            apply_patch("<div></div>", &patch),
            Err(PatchError::InvalidSelector { .. })
        ));
    }
}

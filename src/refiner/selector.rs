//! CSS-style node locators
//!
//! Supported: type, `*`, `#id`, `.class`, `[attr]`, `[attr=value]` compounds,
//! joined by descendant (whitespace) or child (`>`) combinators.

use super::dom::{Document, Element, Node};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid selector '{selector}': {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
enum AttrTest {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }

    fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && *tag != el.name {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        let classes = el.classes();
        if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        self.attrs.iter().all(|test| match test {
            AttrTest::Exists(name) => el.has_attr(name),
            AttrTest::Equals(name, value) => el.attr(name) == Some(value.as_str()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

/// A parsed selector; `steps[i].0` relates step `i` to step `i - 1`
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    steps: Vec<(Combinator, Compound)>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let fail = |reason: &str| SelectorError {
            selector: input.to_string(),
            reason: reason.to_string(),
        };

        let mut steps: Vec<(Combinator, Compound)> = Vec::new();
        let mut current = Compound::default();
        let mut pending = Combinator::Descendant;
        let mut chars = input.trim().chars().peekable();

        let finish = |steps: &mut Vec<(Combinator, Compound)>, current: &mut Compound, comb: Combinator| {
            if !current.is_empty() {
                steps.push((comb, std::mem::take(current)));
                true
            } else {
                false
            }
        };

        while let Some(&c) = chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    chars.next();
                    if finish(&mut steps, &mut current, pending) {
                        pending = Combinator::Descendant;
                    }
                }
                '>' => {
                    chars.next();
                    if finish(&mut steps, &mut current, pending) {
                        pending = Combinator::Descendant;
                    }
                    if steps.is_empty() {
                        return Err(fail("combinator without a left-hand side"));
                    }
                    if pending == Combinator::Child {
                        return Err(fail("repeated '>'"));
                    }
                    pending = Combinator::Child;
                }
                '#' => {
                    chars.next();
                    let id = take_ident(&mut chars);
                    if id.is_empty() {
                        return Err(fail("empty id"));
                    }
                    current.id = Some(id);
                }
                '.' => {
                    chars.next();
                    let class = take_ident(&mut chars);
                    if class.is_empty() {
                        return Err(fail("empty class"));
                    }
                    current.classes.push(class);
                }
                '[' => {
                    chars.next();
                    let mut body = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(fail("unterminated attribute test"));
                    }
                    current.attrs.push(parse_attr_test(&body).ok_or_else(|| fail("bad attribute test"))?);
                }
                '*' => {
                    chars.next();
                    current.tag = Some("*".to_string());
                }
                c if is_ident_char(c) => {
                    if current.tag.is_some() || !current.is_empty() {
                        return Err(fail("type selector must come first"));
                    }
                    current.tag = Some(take_ident(&mut chars).to_ascii_lowercase());
                }
                other => return Err(fail(&format!("unexpected character '{}'", other))),
            }
        }

        if !finish(&mut steps, &mut current, pending) && pending == Combinator::Child {
            return Err(fail("dangling '>'"));
        }
        if steps.is_empty() {
            return Err(fail("empty selector"));
        }
        Ok(Self {
            source: input.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `el`, with `ancestors` ordered root-first, matches
    pub fn matches(&self, el: &Element, ancestors: &[&Element]) -> bool {
        match self.steps.split_last() {
            Some((last, rest)) => last.1.matches(el) && match_rest(rest, last.0, ancestors),
            None => false,
        }
    }

    /// Paths of every matching element, in document order
    pub fn select(&self, doc: &Document) -> Vec<Vec<usize>> {
        let mut found = Vec::new();
        let mut ancestors = Vec::new();
        let mut path = Vec::new();
        walk(&doc.children, self, &mut ancestors, &mut path, &mut found);
        found
    }
}

/// Match the remaining steps right-to-left; `comb` links the step just
/// matched to the last entry of `steps`
fn match_rest(steps: &[(Combinator, Compound)], comb: Combinator, ancestors: &[&Element]) -> bool {
    let Some((step, before)) = steps.split_last() else {
        return true;
    };
    match comb {
        Combinator::Child => match ancestors.split_last() {
            Some((parent, higher)) => step.1.matches(parent) && match_rest(before, step.0, higher),
            None => false,
        },
        Combinator::Descendant => (0..ancestors.len()).rev().any(|i| {
            step.1.matches(ancestors[i]) && match_rest(before, step.0, &ancestors[..i])
        }),
    }
}

fn walk<'d>(
    nodes: &'d [Node],
    selector: &Selector,
    ancestors: &mut Vec<&'d Element>,
    path: &mut Vec<usize>,
    found: &mut Vec<Vec<usize>>,
) {
    for (i, node) in nodes.iter().enumerate() {
        if let Node::Element(el) = node {
            path.push(i);
            if selector.matches(el, ancestors) {
                found.push(path.clone());
            }
            ancestors.push(el);
            walk(&el.children, selector, ancestors, path, found);
            ancestors.pop();
            path.pop();
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !is_ident_char(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

fn parse_attr_test(body: &str) -> Option<AttrTest> {
    match body.split_once('=') {
        None => {
            let name = body.trim();
            (!name.is_empty()).then(|| AttrTest::Exists(name.to_ascii_lowercase()))
        }
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some(AttrTest::Equals(name.to_ascii_lowercase(), value.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<body><header id=\"top\" class=\"site static\"><nav><a href=\"/\">Home</a></nav></header>\
                        <main><section class=\"hero\"><h1>Bread</h1><a data-cta href=\"/order\">Order</a></section></main></body>";

    fn count(sel: &str) -> usize {
        Selector::parse(sel).unwrap().select(&Document::parse(PAGE)).len()
    }

    #[test]
    fn test_simple_selectors() {
        assert_eq!(count("header"), 1);
        assert_eq!(count("#top"), 1);
        assert_eq!(count(".static"), 1);
        assert_eq!(count("header.site.static"), 1);
        assert_eq!(count("a"), 2);
        assert_eq!(count("[data-cta]"), 1);
        assert_eq!(count("a[href='/order']"), 1);
        assert_eq!(count("*"), 8);
    }

    #[test]
    fn test_combinators() {
        assert_eq!(count("header a"), 1);
        assert_eq!(count("body > a"), 0);
        assert_eq!(count("section > a"), 1);
        assert_eq!(count("body main h1"), 1);
        assert_eq!(count("main>section>h1"), 1);
        assert_eq!(count("nav > h1"), 0);
    }

    #[test]
    fn test_select_returns_paths() {
        let doc = Document::parse(PAGE);
        let paths = Selector::parse("h1").unwrap().select(&doc);
        assert_eq!(paths, vec![vec![0, 1, 0, 0]]);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "   ", "> a", "a >", "a > > b", "#", ".", "[href", "a{"] {
            assert!(Selector::parse(bad).is_err(), "{:?} should fail", bad);
        }
    }
}

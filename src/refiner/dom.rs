//! Minimal lossless HTML tree
//!
//! Not a conforming HTML5 parser. It keeps what generated sites contain
//! (doctype, comments, raw-text elements, void elements, attribute order,
//! missing end tags) so that serializing an untouched tree gives back
//! equivalent markup.

/// Elements that never have children or an end tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose body is kept verbatim until the matching end tag
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&name)
}

/// Open element implicitly closed when `opening` starts
fn implicitly_closes(open: &str, opening: &str) -> bool {
    match open {
        "p" => matches!(
            opening,
            "p" | "div" | "section" | "article" | "header" | "footer" | "nav" | "ul" | "ol"
                | "table" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "form" | "main" | "aside"
        ),
        "li" => opening == "li",
        "option" => opening == "option",
        "dt" | "dd" => matches!(opening, "dt" | "dd"),
        "tr" => opening == "tr",
        "td" | "th" => matches!(opening, "td" | "th" | "tr"),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `<!DOCTYPE html>` and other `<!...>` declarations, stored without the brackets
    Doctype(String),
    Comment(String),
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Lowercased tag name
    pub name: String,
    pub attrs: Vec<(String, Option<String>)>,
    pub children: Vec<Node>,
    pub self_closing: bool,
    pub has_end_tag: bool,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
            self_closing: false,
            has_end_tag: !is_void(name),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == name)
    }

    /// Set or replace an attribute, keeping its original position
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = Some(value.to_string()),
            None => self.attrs.push((name.to_string(), Some(value.to_string()))),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attr("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn is_void(&self) -> bool {
        is_void(&self.name)
    }

    /// Replace the children, parsing `html` in the context of this element
    pub fn set_inner_html(&mut self, html: &str) {
        self.children = parse_children_for(&self.name, html);
        if !self.is_void() {
            self.has_end_tag = true;
            self.self_closing = false;
        }
    }
}

/// Parse `html` the way it would be parsed as the body of `parent`
pub fn parse_children_for(parent: &str, html: &str) -> Vec<Node> {
    if is_raw_text(parent) {
        if html.is_empty() {
            Vec::new()
        } else {
            vec![Node::Text(html.to_string())]
        }
    } else {
        parse_fragment(html)
    }
}

/// A parsed document or fragment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub children: Vec<Node>,
}

impl Document {
    pub fn parse(html: &str) -> Self {
        Self {
            children: parse_fragment(html),
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            write_node(node, &mut out);
        }
        out
    }

    /// Node at a child-index path
    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.children.get(*first)?;
        for i in rest {
            node = match node {
                Node::Element(el) => el.children.get(*i)?,
                _ => return None,
            };
        }
        Some(node)
    }

    pub fn element_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let (first, rest) = path.split_first()?;
        let mut node = self.children.get_mut(*first)?;
        for i in rest {
            node = match node {
                Node::Element(el) => el.children.get_mut(*i)?,
                _ => return None,
            };
        }
        match node {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Sibling list holding the node at `path`, with the parent's tag name
    /// (`None` at the top level) and the node's index in it
    pub fn siblings_mut(&mut self, path: &[usize]) -> Option<(&mut Vec<Node>, Option<String>, usize)> {
        let (last, parent) = path.split_last()?;
        if parent.is_empty() {
            return Some((&mut self.children, None, *last));
        }
        let parent = self.element_mut(parent)?;
        let name = parent.name.clone();
        Some((&mut parent.children, Some(name), *last))
    }
}

pub fn parse_fragment(html: &str) -> Vec<Node> {
    Parser::new(html).run()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    /// Open elements; the bottom entry is a synthetic root
    stack: Vec<Element>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            stack: vec![Element::new("#root")],
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn push_node(&mut self, node: Node) {
        if let Some(top) = self.stack.last_mut() {
            top.children.push(node);
        }
    }

    /// Pop the top element and attach it to its parent
    fn close_top(&mut self, explicit: bool) {
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(mut el) = self.stack.pop() {
            el.has_end_tag = explicit;
            self.push_node(Node::Element(el));
        }
    }

    fn run(mut self) -> Vec<Node> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.comment();
            } else if rest.starts_with("</") && starts_tag_name(&rest[2..]) {
                self.end_tag();
            } else if rest.starts_with("<!") {
                self.declaration();
            } else if rest.starts_with('<') && starts_tag_name(&rest[1..]) {
                self.start_tag();
            } else {
                self.text();
            }
        }
        while self.stack.len() > 1 {
            self.close_top(false);
        }
        self.stack.pop().map(|root| root.children).unwrap_or_default()
    }

    fn text(&mut self) {
        let rest = self.rest();
        // Skip the first char so a stray '<' is consumed as text
        let first_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        let end = rest[first_len..]
            .find('<')
            .map(|i| i + first_len)
            .unwrap_or(rest.len());
        let chunk = &rest[..end];
        self.pos += end;
        if let Some(Node::Text(prev)) = self.stack.last_mut().and_then(|t| t.children.last_mut()) {
            prev.push_str(chunk);
        } else {
            self.push_node(Node::Text(chunk.to_string()));
        }
    }

    fn comment(&mut self) {
        let body_start = self.pos + 4;
        let (body, next) = match self.src[body_start..].find("-->") {
            Some(i) => (&self.src[body_start..body_start + i], body_start + i + 3),
            None => (&self.src[body_start..], self.src.len()),
        };
        self.push_node(Node::Comment(body.to_string()));
        self.pos = next;
    }

    fn declaration(&mut self) {
        let body_start = self.pos + 2;
        let (body, next) = match self.src[body_start..].find('>') {
            Some(i) => (&self.src[body_start..body_start + i], body_start + i + 1),
            None => (&self.src[body_start..], self.src.len()),
        };
        self.push_node(Node::Doctype(body.to_string()));
        self.pos = next;
    }

    fn end_tag(&mut self) {
        let name_start = self.pos + 2;
        let name_len = tag_name_len(&self.src[name_start..]);
        let name = self.src[name_start..name_start + name_len].to_ascii_lowercase();
        self.pos = match self.src[name_start..].find('>') {
            Some(i) => name_start + i + 1,
            None => self.src.len(),
        };
        // Stray end tags with no open counterpart are dropped
        let Some(depth) = self.stack.iter().skip(1).rposition(|el| el.name == name) else {
            return;
        };
        let target = depth + 1;
        while self.stack.len() > target + 1 {
            self.close_top(false);
        }
        self.close_top(true);
    }

    fn start_tag(&mut self) {
        let name_start = self.pos + 1;
        let name_len = tag_name_len(&self.src[name_start..]);
        let mut el = Element::new(&self.src[name_start..name_start + name_len]);
        self.pos = name_start + name_len;
        self.attributes(&mut el);

        if self.rest().starts_with("/>") {
            el.self_closing = true;
            self.pos += 2;
        } else if self.rest().starts_with('>') {
            self.pos += 1;
        }

        while self
            .stack
            .last()
            .map(|top| implicitly_closes(&top.name, &el.name))
            .unwrap_or(false)
        {
            self.close_top(false);
        }

        if el.is_void() {
            el.has_end_tag = false;
            self.push_node(Node::Element(el));
        } else if el.self_closing {
            el.has_end_tag = false;
            self.push_node(Node::Element(el));
        } else if is_raw_text(&el.name) {
            self.raw_text(el);
        } else {
            self.stack.push(el);
        }
    }

    fn raw_text(&mut self, mut el: Element) {
        let closing = format!("</{}", el.name);
        let rest = self.rest();
        let lower = rest.to_ascii_lowercase();
        match lower.find(&closing) {
            Some(i) => {
                if i > 0 {
                    el.children.push(Node::Text(rest[..i].to_string()));
                }
                let after = self.pos + i;
                self.pos = match self.src[after..].find('>') {
                    Some(j) => after + j + 1,
                    None => self.src.len(),
                };
                el.has_end_tag = true;
            }
            None => {
                if !rest.is_empty() {
                    el.children.push(Node::Text(rest.to_string()));
                }
                self.pos = self.src.len();
                el.has_end_tag = false;
            }
        }
        self.push_node(Node::Element(el));
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn attributes(&mut self, el: &mut Element) {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() || rest.starts_with('>') || rest.starts_with("/>") {
                return;
            }
            if rest.starts_with('/') {
                self.pos += 1;
                continue;
            }
            let name_len = rest
                .find(|c: char| c.is_whitespace() || matches!(c, '=' | '>' | '/'))
                .unwrap_or(rest.len())
                .max(1);
            let name = rest[..name_len].to_ascii_lowercase();
            self.pos += name_len;
            self.skip_whitespace();

            let value = if self.rest().starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                Some(self.attribute_value())
            } else {
                None
            };
            if !el.has_attr(&name) {
                el.attrs.push((name, value));
            }
        }
    }

    fn attribute_value(&mut self) -> String {
        let rest = self.rest();
        match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &rest[1..];
                match body.find(q) {
                    Some(i) => {
                        self.pos += i + 2;
                        body[..i].to_string()
                    }
                    None => {
                        self.pos = self.src.len();
                        body.to_string()
                    }
                }
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += end;
                rest[..end].to_string()
            }
        }
    }
}

fn starts_tag_name(s: &str) -> bool {
    s.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
}

fn tag_name_len(s: &str) -> usize {
    s.find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ':'))
        .unwrap_or(s.len())
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Doctype(body) => {
            out.push_str("<!");
            out.push_str(body);
            out.push('>');
        }
        Node::Comment(body) => {
            out.push_str("<!--");
            out.push_str(body);
            out.push_str("-->");
        }
        Node::Text(text) => out.push_str(text),
        Node::Element(el) => write_element(el, out),
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        if let Some(value) = value {
            out.push_str("=\"");
            out.push_str(&value.replace('"', "&quot;"));
            out.push('"');
        }
    }
    if el.self_closing {
        out.push_str(" />");
    } else {
        out.push('>');
    }
    for child in &el.children {
        write_node(child, out);
    }
    if el.has_end_tag && !el.is_void() {
        out.push_str("</");
        out.push_str(&el.name);
        out.push('>');
    }
}

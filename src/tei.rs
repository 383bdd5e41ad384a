//! Owned TEI element tree and the small xpath subset used by the field tables.
//!
//! Namespace prefixes are ignored when matching element names, so `tei:cit`
//! and `cit` select the same nodes. Attribute keys are compared by their
//! qualified name (`xml:id`, `xml:lang`, `corresp`).

use crate::error::{DboeError, Result};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Namespace declarations in scope from ancestors, re-emitted by `to_xml`
    /// so a serialized subtree stays a standalone document.
    inherited_ns: Vec<(String, String)>,
}

impl Element {
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn xml_id(&self) -> Option<&str> {
        self.attr("xml:id")
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    fn collect_descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            out.push(child);
            child.collect_descendants(out);
        }
    }

    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_descendants(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.push_text(out),
            }
        }
    }

    /// All descendant text with whitespace collapsed to single spaces.
    pub fn fulltext(&self) -> String {
        let mut raw = String::new();
        self.push_text(&mut raw);
        normalize_space(&raw)
    }

    /// Serializes this element and its subtree.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, true);
        out
    }

    fn write_xml(&self, out: &mut String, top: bool) {
        out.push('<');
        out.push_str(&self.name);
        if top {
            for (k, v) in &self.inherited_ns {
                if self.attr(k).is_none() {
                    push_attr(out, k, v);
                }
            }
        }
        for (k, v) in &self.attributes {
            push_attr(out, k, v);
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(&escape(t.as_str())),
                Node::Element(e) => e.write_xml(out, false),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Evaluates an xpath expression relative to this element.
    pub fn xpath(&self, expr: &str) -> Result<Vec<XNode<'_>>> {
        Ok(XPath::parse(expr)?.eval(self))
    }

    /// First match of an xpath expression as a string value.
    pub fn xpath_first_string(&self, expr: &str) -> Result<Option<String>> {
        Ok(self.xpath(expr)?.first().map(XNode::string_value))
    }
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&escape(value));
    out.push('"');
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, l)| l)
}

pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| DboeError::Xml(e.to_string()))
}

fn start_element(e: &BytesStart<'_>, inherited_ns: &[(String, String)]) -> Result<Element> {
    let name = utf8(e.name().as_ref())?;
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        inherited_ns: inherited_ns.to_vec(),
    })
}

fn in_scope_ns(element: &Element) -> Vec<(String, String)> {
    let mut ns = element.inherited_ns.clone();
    for (k, v) in &element.attributes {
        if k == "xmlns" || k.starts_with("xmlns:") {
            ns.retain(|(existing, _)| existing != k);
            ns.push((k.clone(), v.clone()));
        }
    }
    ns
}

/// Parses an XML document and returns its root element.
pub fn parse(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let inherited = stack.last().map(in_scope_ns).unwrap_or_default();
                stack.push(start_element(&e, &inherited)?);
            }
            Event::Empty(e) => {
                let inherited = stack.last().map(in_scope_ns).unwrap_or_default();
                let element = start_element(&e, &inherited)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DboeError::Xml("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(t.unescape()?.into_owned()));
                }
            }
            Event::CData(c) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    parent.children.push(Node::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(DboeError::Xml("unclosed element at end of input".to_string()));
    }
    root.ok_or_else(|| DboeError::Xml("document has no root element".to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(DboeError::Xml("multiple root elements".to_string())),
    }
    Ok(())
}

/// Checks that a string is a well-formed XML document.
pub fn validate(xml: &str) -> Result<()> {
    parse(xml).map(|_| ())
}

// --- XPath subset ---

#[derive(Debug, Clone, PartialEq)]
pub enum XNode<'a> {
    Element(&'a Element),
    Value(String),
}

impl XNode<'_> {
    pub fn string_value(&self) -> String {
        match self {
            XNode::Element(e) => e.fulltext(),
            XNode::Value(v) => v.clone(),
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            XNode::Element(e) => Some(e),
            XNode::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum AttrTest {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Attrs(Vec<AttrTest>),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    name: String,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Tail {
    Elements,
    Attribute(String),
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    steps: Vec<Step>,
    tail: Tail,
}

fn invalid(expr: &str, why: &str) -> DboeError {
    DboeError::InvalidArgument(format!("unsupported xpath '{}': {}", expr, why))
}

/// Splits on `/` outside of predicate brackets and quotes.
fn split_path(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn parse_attr_test(expr: &str, test: &str) -> Result<AttrTest> {
    let test = test.trim();
    let body = test
        .strip_prefix('@')
        .ok_or_else(|| invalid(expr, "predicate must test an attribute"))?;
    match body.split_once('=') {
        Some((key, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .ok_or_else(|| invalid(expr, "attribute value must be quoted"))?;
            Ok(AttrTest::Equals(key.trim().to_string(), unquoted.to_string()))
        }
        None => Ok(AttrTest::Exists(body.trim().to_string())),
    }
}

fn parse_step(expr: &str, raw: &str, axis: Axis) -> Result<Step> {
    let (name, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    if name.is_empty() {
        return Err(invalid(expr, "empty step"));
    }
    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let close = rest
            .find(']')
            .ok_or_else(|| invalid(expr, "unclosed predicate"))?;
        let inner = rest[1..close].trim();
        if let Ok(n) = inner.parse::<usize>() {
            if n == 0 {
                return Err(invalid(expr, "positions start at 1"));
            }
            predicates.push(Predicate::Position(n));
        } else {
            let tests = inner
                .split(" and ")
                .map(|t| parse_attr_test(expr, t))
                .collect::<Result<Vec<_>>>()?;
            predicates.push(Predicate::Attrs(tests));
        }
        rest = &rest[close + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(invalid(expr, "unexpected text after predicate"));
        }
    }
    Ok(Step {
        axis,
        name: local(name).to_string(),
        predicates,
    })
}

impl XPath {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let body = trimmed
            .strip_prefix('.')
            .ok_or_else(|| invalid(expr, "only relative paths are supported"))?;
        let mut parts = split_path(body).into_iter().peekable();
        // `.` alone, or the empty segment before the first `/`
        if parts.peek() == Some(&"") {
            parts.next();
        }

        let mut steps = Vec::new();
        let mut tail = Tail::Elements;
        let mut axis = Axis::Child;
        while let Some(part) = parts.next() {
            if part.is_empty() {
                axis = Axis::Descendant;
                continue;
            }
            let last = parts.peek().is_none();
            if let Some(attr) = part.strip_prefix('@') {
                if !last {
                    return Err(invalid(expr, "attribute must be the last step"));
                }
                tail = Tail::Attribute(attr.to_string());
            } else if part == "text()" {
                if !last {
                    return Err(invalid(expr, "text() must be the last step"));
                }
                tail = Tail::Text;
            } else {
                steps.push(parse_step(expr, part, axis)?);
            }
            axis = Axis::Child;
        }
        Ok(XPath { steps, tail })
    }

    pub fn eval<'a>(&self, context: &'a Element) -> Vec<XNode<'a>> {
        let mut current: Vec<&'a Element> = vec![context];
        for step in &self.steps {
            let mut next = Vec::new();
            for ctx in &current {
                let candidates: Vec<&'a Element> = match step.axis {
                    Axis::Child => ctx.child_elements().collect(),
                    Axis::Descendant => ctx.descendants(),
                };
                let mut matched: Vec<&'a Element> = candidates
                    .into_iter()
                    .filter(|e| step.name == "*" || e.local_name() == step.name)
                    .collect();
                for predicate in &step.predicates {
                    matched = match predicate {
                        Predicate::Position(n) => matched.get(n - 1).copied().into_iter().collect(),
                        Predicate::Attrs(tests) => matched
                            .into_iter()
                            .filter(|e| tests.iter().all(|t| attr_matches(e, t)))
                            .collect(),
                    };
                }
                next.extend(matched);
            }
            current = next;
        }

        match &self.tail {
            Tail::Elements => current.into_iter().map(XNode::Element).collect(),
            Tail::Attribute(key) => current
                .into_iter()
                .filter_map(|e| e.attr(key).map(|v| XNode::Value(v.to_string())))
                .collect(),
            Tail::Text => current
                .into_iter()
                .flat_map(|e| {
                    e.children.iter().filter_map(|n| match n {
                        Node::Text(t) => Some(XNode::Value(t.clone())),
                        Node::Element(_) => None,
                    })
                })
                .collect(),
        }
    }
}

fn attr_matches(element: &Element, test: &AttrTest) -> bool {
    match test {
        AttrTest::Exists(key) => element.attr(key).is_some(),
        AttrTest::Equals(key, value) => element.attr(key) == Some(value.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b1">
  <form type="hauptlemma"><orth>Haus</orth></form>
  <form type="hauptlemma"><orth>Hütte</orth></form>
  <cit xml:id="b1.c1" n="2" corresp="this:LT1">
    <quote xml:lang="bar">a  <seg type="gram">klein</seg>
      Haus</quote>
  </cit>
  <note type="anmerkung" resp="O" corresp="this:LT1">erste</note>
  <note type="anmerkung" resp="B">zweite</note>
  <usg type="geo"><listPlace corresp="sigle:1A01"><place><placeName type="orig">Wean</placeName><placeName>Wien</placeName></place></listPlace></usg>
</entry>"#;

    #[test]
    fn test_parse_and_fulltext() {
        let root = parse(ENTRY).unwrap();
        assert_eq!(root.local_name(), "entry");
        assert_eq!(root.xml_id(), Some("b1"));
        let quote = root.xpath("./tei:cit/tei:quote").unwrap();
        assert_eq!(quote.len(), 1);
        assert_eq!(quote[0].string_value(), "a klein Haus");
    }

    #[test]
    fn test_positional_and_attribute_predicates() {
        let root = parse(ENTRY).unwrap();
        let first = root
            .xpath_first_string("./tei:form[@type='hauptlemma'][1]/tei:orth")
            .unwrap();
        assert_eq!(first.as_deref(), Some("Haus"));

        let both = root
            .xpath("./tei:note[@type='anmerkung' and @resp and @corresp]")
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].string_value(), "erste");

        let b = root
            .xpath_first_string("./tei:note[@type='anmerkung' and @resp='B']")
            .unwrap();
        assert_eq!(b.as_deref(), Some("zweite"));
    }

    #[test]
    fn test_attribute_tail_and_descendants() {
        let root = parse(ENTRY).unwrap();
        assert_eq!(
            root.xpath_first_string("./tei:cit/tei:quote/@xml:lang").unwrap().as_deref(),
            Some("bar")
        );
        assert_eq!(
            root.xpath_first_string("./@xml:id").unwrap().as_deref(),
            Some("b1")
        );
        let sigle = root.xpath(".//tei:listPlace/@corresp").unwrap();
        assert_eq!(sigle[0].string_value(), "sigle:1A01");
        let orig = root.xpath(".//tei:placeName[@type='orig']/text()").unwrap();
        assert_eq!(orig, vec![XNode::Value("Wean".to_string())]);
        assert!(root.xpath("./tei:missing").unwrap().is_empty());
    }

    #[test]
    fn test_subtree_serialization_keeps_namespace() {
        let root = parse(ENTRY).unwrap();
        let cit = root.xpath("./tei:cit").unwrap();
        let xml = cit[0].as_element().unwrap().to_xml();
        assert!(xml.starts_with("<cit xmlns=\"http://www.tei-c.org/ns/1.0\""));
        let reparsed = parse(&xml).unwrap();
        assert_eq!(reparsed.xml_id(), Some("b1.c1"));
        assert_eq!(reparsed.attr("n"), Some("2"));
    }

    #[test]
    fn test_invalid_input() {
        assert!(parse("<a><b></a>").is_err());
        assert!(parse("").is_err());
        assert!(XPath::parse("/absolute").is_err());
        assert!(XPath::parse("./a[@x=unquoted]").is_err());
        assert!(XPath::parse("./@x/y").is_err());
    }
}

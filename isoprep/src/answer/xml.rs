//! A minimal mutable XML tree, enough to edit unattend files by tag name.

use quick_xml::{
    Reader,
    escape::escape,
    events::{BytesStart, Event},
};

use super::{AnswerError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// Tag name without namespace prefix.
fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.set_text(text);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    fn from_start(start: &BytesStart) -> Result<Self> {
        let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
        for attribute in start.attributes() {
            let attribute = attribute?;
            element.attributes.push((
                String::from_utf8_lossy(attribute.key.as_ref()).to_string(),
                attribute.unescape_value()?.to_string(),
            ));
        }
        Ok(element)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| local_name(&e.name) == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| local_name(&e.name) == name)
    }

    /// The first child named `name`, created at the end if absent.
    pub fn ensure_child(&mut self, name: &str) -> &mut Element {
        let index = self
            .children
            .iter()
            .position(|node| matches!(node, Node::Element(e) if local_name(&e.name) == name));
        let index = match index {
            Some(index) => index,
            None => {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            }
        };
        match &mut self.children[index] {
            Node::Element(element) => element,
            _ => unreachable!("index points at an element"),
        }
    }

    /// Walk a path of child names, creating missing elements.
    pub fn ensure_path(&mut self, path: &[&str]) -> &mut Element {
        path.iter()
            .fold(self, |element, name| element.ensure_child(name))
    }

    /// Remove every child element matching the predicate.
    pub fn remove_children(&mut self, mut predicate: impl FnMut(&Element) -> bool) {
        self.children.retain(|node| match node {
            Node::Element(element) => !predicate(element),
            _ => true,
        });
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Concatenated text content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(text.to_string())];
    }

    fn write(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {key}=\"{}\"", escape(value.as_str())));
        }

        if self.children.is_empty() {
            out.push_str(" />\n");
            return;
        }
        out.push('>');

        if self.children.iter().all(|n| matches!(n, Node::Text(_))) {
            out.push_str(&escape(self.text().as_str()));
        } else {
            out.push('\n');
            for child in &self.children {
                match child {
                    Node::Element(element) => element.write(out, depth + 1),
                    Node::Text(text) => {
                        out.push_str(&"    ".repeat(depth + 1));
                        out.push_str(&escape(text.as_str()));
                        out.push('\n');
                    }
                    Node::Comment(comment) => {
                        out.push_str(&"    ".repeat(depth + 1));
                        out.push_str(&format!("<!--{comment}-->\n"));
                    }
                }
            }
            out.push_str(&indent);
        }
        out.push_str(&format!("</{}>\n", self.name));
    }
}

/// An XML document with a single root element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    /// Parse a document, dropping whitespace between elements.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        let mut attach = |stack: &mut Vec<Element>, node: Node| -> Result<()> {
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => match node {
                    Node::Element(element) if root.is_none() => root = Some(element),
                    Node::Element(_) => {
                        return Err(AnswerError::Xml(String::from("more than one root element")));
                    }
                    // Text and comments outside the root are dropped
                    _ => {}
                },
            }
            Ok(())
        };

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    attach(&mut stack, Node::Element(Element::from_start(&start)?))?
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| AnswerError::Xml(String::from("unbalanced end tag")))?;
                    attach(&mut stack, Node::Element(element))?;
                }
                Event::Text(text) => {
                    let text = text.unescape()?.to_string();
                    attach(&mut stack, Node::Text(text))?;
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(data.as_ref()).to_string();
                    attach(&mut stack, Node::Text(text))?;
                }
                Event::Comment(comment) => {
                    let text = String::from_utf8_lossy(comment.as_ref()).to_string();
                    attach(&mut stack, Node::Comment(text))?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(AnswerError::Xml(String::from("unexpected end of document")));
        }
        drop(attach);
        root.map(|root| Self { root })
            .ok_or_else(|| AnswerError::Xml(String::from("no root element")))
    }

    pub fn serialize(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        self.root.write(&mut out, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let doc = Document::parse(
            "<?xml version=\"1.0\"?>\n<a x=\"1\">\n  <!-- note -->\n  <b>t &amp; u</b>\n  <c/>\n</a>\n",
        )
        .unwrap();

        assert_eq!(doc.root.attr("x"), Some("1"));
        assert_eq!(doc.root.child("b").unwrap().text(), "t & u");
        assert_eq!(
            doc.serialize(),
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<a x=\"1\">\n    <!-- note -->\n    <b>t &amp; u</b>\n    <c />\n</a>\n"
        );
        assert_eq!(Document::parse(&doc.serialize()).unwrap(), doc);
    }

    #[test]
    fn test_ensure_path_creates_once() {
        let mut root = Element::new("root");
        root.ensure_path(&["a", "b"]).set_text("1");
        root.ensure_path(&["a", "b"]).set_text("2");
        assert_eq!(root.elements().count(), 1);
        assert_eq!(root.child("a").unwrap().child("b").unwrap().text(), "2");
    }

    #[test]
    fn test_prefixed_names_match_local_name() {
        let doc = Document::parse("<u:a xmlns:u=\"x\"><u:b>v</u:b></u:a>").unwrap();
        assert_eq!(doc.root.child("b").unwrap().text(), "v");
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(Document::parse("<a><b></a>"), Err(AnswerError::Xml(_))));
        assert!(matches!(Document::parse(""), Err(AnswerError::Xml(_))));
    }
}

use crate::path::is_registry_key;
use crate::tree::QName;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed placeholder in '{input}': {message}")]
pub struct PlaceholderError {
    pub input: String,
    pub message: String,
}

/// Piece of fragment text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `{{token}}`, replaced by the token resolver.
    Token(String),
    /// `#{namespace:label}`, replaced by a freshly allocated identifier.
    Identifier { namespace: String, label: String },
}

/// Attribute value or text content of a fragment node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemplateText {
    segments: Vec<Segment>,
}

impl TemplateText {
    pub fn parse(input: &str) -> Result<Self, PlaceholderError> {
        let error = |message: &str| PlaceholderError {
            input: input.to_string(),
            message: message.to_string(),
        };
        let mut segments = Vec::new();
        let mut literal_start = 0;
        let mut i = 0;

        while i < input.len() {
            let rest = &input[i..];
            if rest.starts_with("{{") {
                if let Some(close) = rest[2..].find("}}") {
                    push_literal(&mut segments, &input[literal_start..i]);
                    let name = rest[2..2 + close].trim();
                    if name.is_empty() {
                        return Err(error("empty token placeholder"));
                    }
                    segments.push(Segment::Token(name.to_string()));
                    i += 2 + close + 2;
                    literal_start = i;
                    continue;
                }
            } else if rest.starts_with("#{") && !rest[2..].starts_with('{') {
                let close = rest[2..]
                    .find('}')
                    .ok_or_else(|| error("unterminated identifier placeholder"))?;
                let inner = &rest[2..2 + close];
                let (namespace, label) = inner
                    .split_once(':')
                    .ok_or_else(|| error("identifier placeholder must be '#{namespace:label}'"))?;
                if !is_registry_key(namespace) || !is_registry_key(label) {
                    return Err(error("identifier namespace and label must be plain names"));
                }
                push_literal(&mut segments, &input[literal_start..i]);
                segments.push(Segment::Identifier {
                    namespace: namespace.to_string(),
                    label: label.to_string(),
                });
                i += 2 + close + 1;
                literal_start = i;
                continue;
            }
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
        push_literal(&mut segments, &input[literal_start..]);
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn identifiers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Identifier { namespace, label } => Some((namespace.as_str(), label.as_str())),
            _ => None,
        })
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentNode {
    pub name: QName,
    pub attributes: Vec<(QName, TemplateText)>,
    pub text: Option<TemplateText>,
    pub children: Vec<FragmentNode>,
}

impl FragmentNode {
    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a FragmentNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    fn texts(&self) -> impl Iterator<Item = &TemplateText> {
        self.attributes
            .iter()
            .map(|(_, text)| text)
            .chain(self.text.iter())
    }
}

/// A compiled, immutable fragment from the registry `fragments` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentTemplate {
    name: String,
    root: FragmentNode,
}

impl FragmentTemplate {
    pub fn new(name: impl Into<String>, root: FragmentNode) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &FragmentNode {
        &self.root
    }

    /// Distinct `(namespace, label)` identifier placeholders, in first
    /// occurrence order (pre-order, attributes before text).
    pub fn identifier_placeholders(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = Vec::new();
        self.root.walk(&mut |node| {
            for text in node.texts() {
                for placeholder in text.identifiers() {
                    if !out.contains(&placeholder) {
                        out.push(placeholder);
                    }
                }
            }
        });
        out
    }

    pub fn tokens(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        self.root.walk(&mut |node| {
            for text in node.texts() {
                for token in text.tokens() {
                    if !out.contains(&token) {
                        out.push(token);
                    }
                }
            }
        });
        out
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.root.walk(&mut |_| count += 1);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mixed_placeholders() {
        let text = TemplateText::parse("rel #{rel:img} for {{ brand.name }}!").unwrap();
        assert_eq!(
            text.segments(),
            &[
                Segment::Literal("rel ".to_string()),
                Segment::Identifier {
                    namespace: "rel".to_string(),
                    label: "img".to_string()
                },
                Segment::Literal(" for ".to_string()),
                Segment::Token("brand.name".to_string()),
                Segment::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn hash_before_token_is_literal() {
        let text = TemplateText::parse("#{{brand.accent1}}").unwrap();
        assert_eq!(
            text.segments(),
            &[
                Segment::Literal("#".to_string()),
                Segment::Token("brand.accent1".to_string()),
            ]
        );
    }

    #[test]
    fn non_ascii_literals_around_placeholders() {
        let text = TemplateText::parse("© {{company}} · Folie #{shape:n} – Entwurf ✓").unwrap();
        assert_eq!(
            text.segments(),
            &[
                Segment::Literal("© ".to_string()),
                Segment::Token("company".to_string()),
                Segment::Literal(" · Folie ".to_string()),
                Segment::Identifier {
                    namespace: "shape".to_string(),
                    label: "n".to_string()
                },
                Segment::Literal(" – Entwurf ✓".to_string()),
            ]
        );
        assert_eq!(
            TemplateText::parse("Café").unwrap().segments(),
            &[Segment::Literal("Café".to_string())]
        );
    }

    #[test]
    fn malformed_identifier_placeholders() {
        assert!(TemplateText::parse("#{shape").is_err());
        assert!(TemplateText::parse("#{shape}").is_err());
        assert!(TemplateText::parse("#{:x}").is_err());
        assert!(TemplateText::parse("{{ }}").is_err());
    }

    #[test]
    fn placeholders_are_collected_once() {
        let text = |input: &str| TemplateText::parse(input).unwrap();
        let root = FragmentNode {
            name: QName::local("sp"),
            attributes: vec![(QName::local("id"), text("#{shape:a}"))],
            text: None,
            children: vec![FragmentNode {
                name: QName::local("ref"),
                attributes: vec![
                    (QName::local("target"), text("#{shape:a}")),
                    (QName::local("other"), text("#{shape:b}{{t}}")),
                ],
                text: Some(text("{{t}}")),
                children: Vec::new(),
            }],
        };
        let template = FragmentTemplate::new("f", root);
        assert_eq!(
            template.identifier_placeholders(),
            [("shape", "a"), ("shape", "b")]
        );
        assert_eq!(template.tokens(), ["t"]);
        assert_eq!(template.node_count(), 2);
    }
}

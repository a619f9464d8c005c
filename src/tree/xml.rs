//! XML bridge: parse one part into a [`DocumentTree`] and serialise it back.
//!
//! Namespace prefixes are resolved while reading, so every element and
//! attribute carries its namespace URI. On output, declarations present in
//! the source are re-emitted as-is and any prefix introduced by fragment
//! instantiation gets a declaration on the first element that needs it.

use super::{
    Attribute, DocumentTree, Element, NamespaceDecl, NodeId, NodeKind, QName, TreeError,
    XmlDeclaration,
};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("undeclared namespace prefix '{prefix}' on <{name}>")]
    UndeclaredPrefix { prefix: String, name: String },

    #[error("unexpected closing tag </{name}>")]
    UnexpectedClose { name: String },

    #[error("document has no root element")]
    MissingRoot,

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn malformed(position: u64, message: impl ToString) -> XmlError {
    XmlError::Malformed {
        position,
        message: message.to_string(),
    }
}

pub fn parse_str(input: &str) -> Result<DocumentTree, XmlError> {
    let mut reader = Reader::from_str(input);
    let mut tree = DocumentTree::new();
    let mut stack: Vec<NodeId> = vec![tree.document()];
    let mut scopes: Vec<Vec<NamespaceDecl>> = Vec::new();

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|err| malformed(position, err))?;
        let parent = *stack.last().unwrap_or(&tree.document());

        match event {
            Event::Decl(decl) => {
                tree.set_declaration(Some(read_declaration(&decl, position)?));
            }
            Event::Start(start) => {
                let element = read_element(&start, &scopes, position)?;
                let decls = element.namespace_decls.clone();
                let id = tree.create_element(element);
                tree.append_child(parent, id)?;
                stack.push(id);
                scopes.push(decls);
            }
            Event::Empty(start) => {
                let element = read_element(&start, &scopes, position)?;
                let id = tree.create_element(element);
                tree.append_child(parent, id)?;
            }
            Event::End(end) => {
                if stack.len() <= 1 {
                    return Err(XmlError::UnexpectedClose {
                        name: String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                    });
                }
                stack.pop();
                scopes.pop();
            }
            Event::Text(text) => {
                if parent == tree.document() {
                    continue;
                }
                let value = text.unescape().map_err(|err| malformed(position, err))?;
                let id = tree.create_text(value.into_owned());
                tree.append_child(parent, id)?;
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                let id = tree.create_text(value);
                tree.append_child(parent, id)?;
            }
            Event::Comment(comment) => {
                let value = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                let id = tree.create_comment(value);
                tree.append_child(parent, id)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() > 1 {
        return Err(malformed(input.len() as u64, "unclosed element at end of input"));
    }
    if tree.root_element().is_none() {
        return Err(XmlError::MissingRoot);
    }
    Ok(tree)
}

fn read_declaration(decl: &BytesDecl<'_>, position: u64) -> Result<XmlDeclaration, XmlError> {
    let version = decl.version().map_err(|err| malformed(position, err))?;
    let encoding = match decl.encoding() {
        Some(value) => Some(value.map_err(|err| malformed(position, err))?),
        None => None,
    };
    let standalone = match decl.standalone() {
        Some(value) => Some(value.map_err(|err| malformed(position, err))?),
        None => None,
    };
    Ok(XmlDeclaration {
        version: String::from_utf8_lossy(&version).into_owned(),
        encoding: encoding.map(|value| String::from_utf8_lossy(&value).into_owned()),
        standalone: standalone.map(|value| String::from_utf8_lossy(&value).into_owned()),
    })
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

fn lookup<'a>(
    prefix: Option<&str>,
    own: &'a [NamespaceDecl],
    scopes: &'a [Vec<NamespaceDecl>],
) -> Option<&'a str> {
    if prefix == Some("xml") {
        return Some(XML_NAMESPACE);
    }
    std::iter::once(own)
        .chain(scopes.iter().rev().map(Vec::as_slice))
        .flat_map(|decls| decls.iter())
        .find(|decl| decl.prefix.as_deref() == prefix)
        .map(|decl| decl.uri.as_str())
}

fn read_element(
    start: &BytesStart<'_>,
    scopes: &[Vec<NamespaceDecl>],
    position: u64,
) -> Result<Element, XmlError> {
    let raw_name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| malformed(position, err))?
        .to_string();

    let mut decls = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| malformed(position, err))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| malformed(position, err))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(position, err))?
            .into_owned();
        if key == "xmlns" {
            decls.push(NamespaceDecl { prefix: None, uri: value });
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            decls.push(NamespaceDecl {
                prefix: Some(prefix.to_string()),
                uri: value,
            });
        } else {
            raw_attributes.push((key, value));
        }
    }

    let (prefix, local) = split_name(&raw_name);
    let namespace = match lookup(prefix, &decls, scopes) {
        Some(uri) if !uri.is_empty() => Some(uri.to_string()),
        Some(_) => None,
        None if prefix.is_some() => {
            return Err(XmlError::UndeclaredPrefix {
                prefix: prefix.unwrap_or_default().to_string(),
                name: raw_name.clone(),
            })
        }
        None => None,
    };
    let name = QName {
        prefix: prefix.map(str::to_string),
        local: local.to_string(),
        namespace,
    };

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (attr_prefix, attr_local) = split_name(&key);
        // Unprefixed attributes never take the default namespace.
        let attr_namespace = match attr_prefix {
            Some(p) => Some(
                lookup(Some(p), &decls, scopes)
                    .ok_or_else(|| XmlError::UndeclaredPrefix {
                        prefix: p.to_string(),
                        name: raw_name.clone(),
                    })?
                    .to_string(),
            ),
            None => None,
        };
        attributes.push(Attribute {
            name: QName {
                prefix: attr_prefix.map(str::to_string),
                local: attr_local.to_string(),
                namespace: attr_namespace,
            },
            value,
        });
    }

    Ok(Element {
        name,
        attributes,
        namespace_decls: decls,
    })
}

/// Serialise the attached tree.
pub fn to_xml_string(tree: &DocumentTree) -> String {
    let mut out = String::new();
    if let Some(decl) = tree.declaration() {
        let _ = write!(out, "<?xml version=\"{}\"", decl.version);
        if let Some(encoding) = &decl.encoding {
            let _ = write!(out, " encoding=\"{encoding}\"");
        }
        if let Some(standalone) = &decl.standalone {
            let _ = write!(out, " standalone=\"{standalone}\"");
        }
        out.push_str("?>\n");
    }
    let mut scopes = Vec::new();
    for child in tree.children(tree.document()) {
        write_node(tree, *child, &mut scopes, &mut out);
    }
    out
}

fn write_node(
    tree: &DocumentTree,
    id: NodeId,
    scopes: &mut Vec<Vec<NamespaceDecl>>,
    out: &mut String,
) {
    match tree.kind(id) {
        NodeKind::Document => {}
        NodeKind::Text(text) => out.push_str(&partial_escape(text.as_str())),
        NodeKind::Comment(text) => {
            let _ = write!(out, "<!--{text}-->");
        }
        NodeKind::Element(element) => {
            let decls = effective_decls(element, scopes);
            let name = element.name.qualified();
            out.push('<');
            out.push_str(&name);
            for decl in &decls {
                match &decl.prefix {
                    Some(prefix) => {
                        let _ = write!(out, " xmlns:{prefix}=\"{}\"", escape(decl.uri.as_str()));
                    }
                    None => {
                        let _ = write!(out, " xmlns=\"{}\"", escape(decl.uri.as_str()));
                    }
                }
            }
            for attr in &element.attributes {
                let _ = write!(
                    out,
                    " {}=\"{}\"",
                    attr.name.qualified(),
                    escape(attr.value.as_str())
                );
            }
            let children = tree.children(id);
            if children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            scopes.push(decls);
            for child in children {
                write_node(tree, *child, scopes, out);
            }
            scopes.pop();
            let _ = write!(out, "</{name}>");
        }
    }
}

/// Declarations to emit on `element`: its own, plus any binding its name or
/// attributes need that the enclosing scope does not provide.
fn effective_decls(element: &Element, scopes: &[Vec<NamespaceDecl>]) -> Vec<NamespaceDecl> {
    let mut decls = element.namespace_decls.clone();
    let require = |prefix: Option<&str>, uri: &str, decls: &mut Vec<NamespaceDecl>| {
        if prefix == Some("xml") {
            return;
        }
        let bound = lookup(prefix, decls, scopes).unwrap_or("");
        if bound != uri {
            decls.retain(|decl| decl.prefix.as_deref() != prefix);
            decls.push(NamespaceDecl {
                prefix: prefix.map(str::to_string),
                uri: uri.to_string(),
            });
        }
    };

    let name = &element.name;
    require(
        name.prefix.as_deref(),
        name.namespace.as_deref().unwrap_or(""),
        &mut decls,
    );
    for attr in &element.attributes {
        if let (Some(prefix), Some(uri)) = (&attr.name.prefix, &attr.name.namespace) {
            require(Some(prefix), uri, &mut decls);
        }
    }
    decls
}

pub fn read_from_path(path: impl AsRef<Path>) -> Result<DocumentTree, XmlError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| XmlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&contents)
}

/// Atomic write: tempfile in the same directory, fsync, rename.
pub fn write_to_path(tree: &DocumentTree, path: impl AsRef<Path>) -> Result<(), XmlError> {
    let path = path.as_ref();
    let io_err = |source| XmlError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    temp.write_all(to_xml_string(tree).as_bytes())
        .map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

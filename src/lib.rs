//! OOXML Patcher: declarative, symbol-driven edits of Office Open XML parts.
//!
//! Patch files never spell out XML names. Every element, attribute, selector
//! and fragment they mention is a key into a [`Registry`], which is the only
//! place literal names and namespace URIs live. Swapping or layering the
//! registry retargets every patch without touching it.
//!
//! # Architecture
//!
//! - [`registry`] compiles registry TOML into resolved names, parsed
//!   selectors and fragment templates, rejecting dangling symbols up front.
//! - [`bind`] turns a selector's free symbols into concrete names and values;
//!   [`cache`] memoises that per thread.
//! - [`select`] evaluates a bound selector over a [`DocumentTree`].
//! - [`patch`] runs `set`, `insert`, `remove`, `ensurePath`, `ensurePart` and
//!   `ensureAttr` operations in order, with rollback of the failing one.
//! - [`fragment`] instantiates templates with fresh, collision-free ids.
//! - [`part`] is the seam to whatever holds the package's parts.
//!
//! # Example
//!
//! ```
//! use ooxml_patcher::part::MemoryPackage;
//! use ooxml_patcher::patch::PatchSession;
//! use ooxml_patcher::token::NoTokens;
//! use ooxml_patcher::tree::{parse_str, to_xml_string};
//!
//! let registry = ooxml_patcher::registry::load_from_str(r#"
//! [namespaces]
//! a = "http://schemas.openxmlformats.org/drawingml/2006/main"
//!
//! [elements]
//! theme = "a:theme"
//! clrScheme = "a:clrScheme"
//! accent1 = "a:accent1"
//! srgbClr = "a:srgbClr"
//!
//! [attributes]
//! val = "val"
//!
//! [paths]
//! accent1ColorAttr = "/theme/clrScheme/accent1/srgbClr/@val"
//! "#).unwrap();
//!
//! let patch = ooxml_patcher::patch::load_from_str(r#"
//! [[operations]]
//! kind = "set"
//! target_ref = "accent1ColorAttr"
//! value = "1F4E79"
//! "#).unwrap();
//!
//! let mut tree = parse_str(
//!     r#"<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><a:clrScheme><a:accent1><a:srgbClr val="4472C4"/></a:accent1></a:clrScheme></a:theme>"#,
//! ).unwrap();
//!
//! let mut session = PatchSession::new(&registry, &NoTokens);
//! let report = session.apply(&mut tree, &mut MemoryPackage::new(), &patch).unwrap();
//! assert_eq!(report.applied(), 1);
//! assert!(to_xml_string(&tree).contains(r#"val="1F4E79""#));
//! ```

pub mod bind;
pub mod cache;
pub mod fragment;
pub mod part;
pub mod patch;
pub mod path;
pub mod registry;
pub mod select;
pub mod token;
pub mod tree;

// Re-exports
pub use bind::{bind, BindError, Variable, VariableMap};
pub use fragment::{FragmentTemplate, IdAllocator, InstantiateError};
pub use part::{MemoryPackage, PartManager, PartSpec};
pub use patch::{
    ApplyOptions, EngineError, OperationResult, PatchError, PatchFile, PatchOperation,
    PatchReport, PatchSession,
};
pub use path::{PathAst, PathTemplate};
pub use registry::{CompileError, Registry, RegistryError};
pub use select::{evaluate, NodeRef, SelectError};
pub use token::{TokenResolver, TokenSet};
pub use tree::{DocumentTree, NodeId, QName};

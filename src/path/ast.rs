use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// `/`: direct children of the context node.
    Child,
    /// `//`: descendants of the context node, in document order.
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NameTest {
    /// Element symbol from the registry `elements` table.
    Symbol(String),
    /// `*`: any element.
    Any,
}

/// One step of a compiled selector. The set of step kinds is closed so the
/// executor can match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Element { axis: Axis, test: NameTest },
    Attribute { symbol: String },
    Predicate(Predicate),
}

/// Filter on the preceding element step. Without `equals` it is an
/// existence test on `path`; with it, the string value of some node selected
/// by `path` must equal the bound `$variable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub path: Vec<Step>,
    pub equals: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathAst {
    pub steps: Vec<Step>,
}

impl PathAst {
    /// True when the selector ends in an attribute step.
    pub fn selects_attribute(&self) -> bool {
        matches!(self.steps.last(), Some(Step::Attribute { .. }))
    }

    pub fn element_symbols(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        visit(&self.steps, &mut |step| {
            if let Step::Element {
                test: NameTest::Symbol(symbol),
                ..
            } = step
            {
                out.insert(symbol.as_str());
            }
        });
        out
    }

    pub fn attribute_symbols(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        visit(&self.steps, &mut |step| {
            if let Step::Attribute { symbol } = step {
                out.insert(symbol.as_str());
            }
        });
        out
    }

    /// Names of `$variables` compared in predicates.
    pub fn value_variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        visit(&self.steps, &mut |step| {
            if let Step::Predicate(Predicate {
                equals: Some(name), ..
            }) = step
            {
                out.insert(name.as_str());
            }
        });
        out
    }
}

fn visit<'a>(steps: &'a [Step], f: &mut impl FnMut(&'a Step)) {
    for step in steps {
        f(step);
        if let Step::Predicate(predicate) = step {
            visit(&predicate.path, f);
        }
    }
}

fn write_steps(f: &mut fmt::Formatter<'_>, steps: &[Step], relative: bool) -> fmt::Result {
    for (idx, step) in steps.iter().enumerate() {
        let leading = idx == 0 && relative;
        match step {
            Step::Element { axis, test } => {
                match (axis, leading) {
                    (Axis::Child, true) => {}
                    (Axis::Child, false) => write!(f, "/")?,
                    (Axis::Descendant, _) => write!(f, "//")?,
                }
                match test {
                    NameTest::Symbol(symbol) => write!(f, "{symbol}")?,
                    NameTest::Any => write!(f, "*")?,
                }
            }
            Step::Attribute { symbol } => {
                if !leading {
                    write!(f, "/")?;
                }
                write!(f, "@{symbol}")?;
            }
            Step::Predicate(predicate) => {
                write!(f, "[")?;
                write_steps(f, &predicate.path, true)?;
                if let Some(name) = &predicate.equals {
                    write!(f, " = ${name}")?;
                }
                write!(f, "]")?;
            }
        }
    }
    Ok(())
}

/// Canonical source form; parsing the output yields an equal AST.
impl fmt::Display for PathAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_steps(f, &self.steps, false)
    }
}

/// A named, compiled selector from the registry `paths` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    name: String,
    source: String,
    ast: PathAst,
}

impl PathTemplate {
    pub fn new(name: impl Into<String>, source: impl Into<String>, ast: PathAst) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            ast,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &PathAst {
        &self.ast
    }
}

use crate::path::ast::{Axis, NameTest, PathAst, Predicate, Step};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("at offset {position}: {message}")]
pub struct PathError {
    pub position: usize,
    pub message: String,
}

/// Parse a selector written over registry symbols.
///
/// ```text
/// path      := ('/' | '//')? step (('/' | '//') step)* ('/' '@' SYMBOL)?
/// step      := (SYMBOL | '*') predicate*
/// predicate := '[' rel ('=' '$' NAME)? ']'
/// rel       := '@' SYMBOL | (SYMBOL | '*') ('/' (SYMBOL | '*'))* ('/' '@' SYMBOL)?
/// ```
///
/// Literal values are rejected: comparisons always go through a `$variable`.
pub fn parse(input: &str) -> Result<PathAst, PathError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Err(parser.error("empty path"));
    }
    let steps = parser.parse_steps(false)?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.unexpected());
    }
    Ok(PathAst { steps })
}

/// True when `c` may appear in a registry symbol or variable name.
pub fn is_symbol_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'.'
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn starts_with(&self, text: &str) -> bool {
        self.input[self.pos..].starts_with(text.as_bytes())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> PathError {
        PathError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn unexpected(&self) -> PathError {
        match self.peek() {
            Some(b'\'') | Some(b'"') => {
                self.error("literal values are not allowed; compare against a $variable")
            }
            Some(c) if c.is_ascii_digit() => {
                self.error("numeric literals are not allowed; compare against a $variable")
            }
            Some(c) => self.error(format!("unexpected character '{}'", c as char)),
            None => self.error("unexpected end of path"),
        }
    }

    fn symbol(&mut self, what: &str) -> Result<String, PathError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_symbol_char(c)) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                None => self.error(format!("expected {what}")),
                Some(_) => self.error(format!("expected {what}, found '{}'", self.rest_char())),
            });
        }
        let text = &self.input[start..self.pos];
        if text[0].is_ascii_digit() {
            self.pos = start;
            return Err(self.unexpected());
        }
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    fn rest_char(&self) -> char {
        self.peek().map(|c| c as char).unwrap_or(' ')
    }

    fn axis(&mut self) -> Option<Axis> {
        if self.starts_with("//") {
            self.pos += 2;
            Some(Axis::Descendant)
        } else if self.starts_with("/") {
            self.pos += 1;
            Some(Axis::Child)
        } else {
            None
        }
    }

    fn at_terminator(&self, relative: bool) -> bool {
        match self.peek() {
            None => true,
            Some(b']') | Some(b'=') if relative => true,
            Some(c) if c.is_ascii_whitespace() => true,
            _ => false,
        }
    }

    fn parse_steps(&mut self, relative: bool) -> Result<Vec<Step>, PathError> {
        let mut steps = Vec::new();
        let mut axis = match self.axis() {
            Some(_) if relative => {
                return Err(self.error("predicate paths are relative and cannot start with '/'"))
            }
            Some(axis) => axis,
            None => Axis::Child,
        };

        loop {
            if self.peek() == Some(b'@') {
                if axis == Axis::Descendant {
                    return Err(self.error("attribute step cannot follow '//'"));
                }
                self.pos += 1;
                let symbol = self.symbol("attribute symbol")?;
                steps.push(Step::Attribute { symbol });
                if !self.at_terminator(relative) {
                    return Err(self.error("attribute step must be the last step"));
                }
                return Ok(steps);
            }

            let test = if self.peek() == Some(b'*') {
                self.pos += 1;
                NameTest::Any
            } else {
                NameTest::Symbol(self.symbol("element symbol")?)
            };
            steps.push(Step::Element { axis, test });

            while self.peek() == Some(b'[') {
                let predicate = self.parse_predicate()?;
                steps.push(Step::Predicate(predicate));
            }

            if self.at_terminator(relative) {
                return Ok(steps);
            }
            axis = match self.axis() {
                Some(axis) => axis,
                None => return Err(self.unexpected()),
            };
            if self.at_end() {
                return Err(self.error("dangling '/' at end of path"));
            }
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, PathError> {
        let open = self.pos;
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(b']') {
            return Err(self.error("empty predicate"));
        }
        let path = self.parse_steps(true)?;
        self.skip_ws();

        let mut equals = None;
        if self.peek() == Some(b'=') {
            self.pos += 1;
            self.skip_ws();
            if self.peek() != Some(b'$') {
                return Err(self.unexpected());
            }
            self.pos += 1;
            equals = Some(self.symbol("variable name")?);
            self.skip_ws();
        }

        if self.peek() != Some(b']') {
            return Err(PathError {
                position: open,
                message: "unbalanced '[' in predicate".to_string(),
            });
        }
        self.pos += 1;
        Ok(Predicate { path, equals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(axis: Axis, symbol: &str) -> Step {
        Step::Element {
            axis,
            test: NameTest::Symbol(symbol.to_string()),
        }
    }

    #[test]
    fn parse_absolute_attribute_path() {
        let ast = parse("/theme/themeElements/clrScheme/accent1/srgbClr/@val").unwrap();
        assert_eq!(ast.steps.len(), 6);
        assert_eq!(ast.steps[0], element(Axis::Child, "theme"));
        assert_eq!(
            ast.steps[5],
            Step::Attribute {
                symbol: "val".to_string()
            }
        );
        assert!(ast.selects_attribute());
    }

    #[test]
    fn parse_descendant_with_predicate() {
        let ast = parse("//spTree/sp[nvSpPr/nvPr/ph/@phType = $footerType]").unwrap();
        assert_eq!(ast.steps[0], element(Axis::Descendant, "spTree"));
        let Step::Predicate(predicate) = &ast.steps[2] else {
            panic!("expected predicate");
        };
        assert_eq!(predicate.equals.as_deref(), Some("footerType"));
        assert_eq!(predicate.path.len(), 4);
        assert_eq!(
            ast.element_symbols().into_iter().collect::<Vec<_>>(),
            ["nvPr", "nvSpPr", "ph", "sp", "spTree"]
        );
        assert_eq!(
            ast.value_variables().into_iter().collect::<Vec<_>>(),
            ["footerType"]
        );
    }

    #[test]
    fn display_round_trips() {
        for source in [
            "/sld/cSld/spTree",
            "//sp[@shapeId]/*",
            "/a//b[c[@d = $e]]/@f",
        ] {
            let ast = parse(source).unwrap();
            assert_eq!(parse(&ast.to_string()).unwrap(), ast);
        }
    }

    #[test]
    fn literals_are_rejected() {
        let err = parse("//sp[@type = 'ftr']").unwrap_err();
        assert!(err.message.contains("literal"));
        let err = parse("//sp[@idx = 3]").unwrap_err();
        assert!(err.message.contains("numeric"));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for source in [
            "",
            "/",
            "/sld/",
            "/sld[@id",
            "/sld/@val/more",
            "/sld[]",
            "/sld[/abs]",
            "p:sld",
            "//@val",
        ] {
            assert!(parse(source).is_err(), "expected error for {source:?}");
        }
    }
}

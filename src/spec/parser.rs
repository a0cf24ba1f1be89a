// src/spec/parser.rs

//! Spec-string parser
//!
//! Grammar (whitespace between tokens is ignored):
//!
//! ```text
//! spec     := node ( '^' node )*
//! node     := [name] ( '@' versions
//!                    | '+' variant | '~' variant
//!                    | key '=' value
//!                    | '%' compiler [ '@' versions ] )*
//! ```
//!
//! The keys `arch`, `platform`, `os` and `target` set architecture parts;
//! any other key is a valued variant. A target may be a range such as
//! `target=x86_64:` or `target=nehalem:skylake`.

use super::{
    AbstractSpec, ArchConstraint, ArchField, CompilerConstraint, DepTypes, DependencyConstraint,
    VariantValue,
};
use crate::error::{Error, Result};
use crate::version::VersionConstraint;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | ',')
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ',' | '*' | '/' | ':')
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::ParseError(format!(
            "{} at position {} in '{}'",
            msg.into(),
            self.pos,
            self.input
        ))
    }

    fn ident(&mut self, what: &str) -> Result<&'a str> {
        self.skip_ws();
        let ident = self.take_while(is_ident_char);
        if ident.is_empty() {
            return Err(self.error(format!("expected {}", what)));
        }
        Ok(ident)
    }

    fn versions(&mut self) -> Result<VersionConstraint> {
        self.skip_ws();
        let text = self.take_while(is_version_char);
        if text.is_empty() {
            return Err(self.error("expected a version after '@'"));
        }
        VersionConstraint::parse(text)
    }

    fn set_variant(
        &self,
        node: &mut AbstractSpec,
        name: &str,
        value: VariantValue,
    ) -> Result<()> {
        if node.variants.insert(name.to_string(), value).is_some() {
            return Err(self.error(format!("variant '{}' given twice", name)));
        }
        Ok(())
    }

    fn set_arch(&self, node: &mut AbstractSpec, arch: ArchConstraint) -> Result<()> {
        node.arch = node
            .arch
            .intersect(&arch)
            .map_err(|field| self.error(format!("conflicting {} values", field)))?;
        Ok(())
    }

    /// Parse one node, stopping at '^' or end of input
    fn node(&mut self) -> Result<AbstractSpec> {
        let mut node = AbstractSpec::default();
        let mut seen_any = false;

        loop {
            self.skip_ws();
            let Some(c) = self.peek() else { break };
            match c {
                '^' => break,
                '@' => {
                    self.bump();
                    if !node.versions.is_any() {
                        return Err(self.error("version given twice"));
                    }
                    node.versions = self.versions()?;
                }
                '+' | '~' => {
                    self.bump();
                    let name = self.ident("a variant name")?;
                    self.set_variant(&mut node, name, VariantValue::Bool(c == '+'))?;
                }
                '%' => {
                    self.bump();
                    if node.compiler.is_some() {
                        return Err(self.error("compiler given twice"));
                    }
                    let name = self.ident("a compiler name")?;
                    let versions = if self.peek() == Some('@') {
                        self.bump();
                        self.versions()?
                    } else {
                        VersionConstraint::Any
                    };
                    node.compiler = Some(CompilerConstraint::new(name, versions));
                }
                c if is_ident_char(c) => {
                    let word = self.ident("a name")?;
                    if self.peek() == Some('=') {
                        self.bump();
                        let value = self.take_while(is_value_char);
                        if value.is_empty() {
                            return Err(self.error(format!("missing value for '{}'", word)));
                        }
                        match word {
                            "arch" | "architecture" => {
                                let arch = ArchConstraint::parse_triple(value)?;
                                self.set_arch(&mut node, arch)?;
                            }
                            "platform" | "os" | "target" => {
                                let field = match word {
                                    "platform" => ArchField::Platform,
                                    "os" => ArchField::Os,
                                    _ => ArchField::Target,
                                };
                                let arch = ArchConstraint::default().with_field(field, value)?;
                                self.set_arch(&mut node, arch)?;
                            }
                            _ => self.set_variant(&mut node, word, VariantValue::parse(value))?,
                        }
                    } else if node.name.is_none() && !seen_any {
                        node.name = Some(word.to_string());
                    } else {
                        return Err(self.error(format!(
                            "unexpected '{}'; a package name must come first",
                            word
                        )));
                    }
                }
                other => return Err(self.error(format!("unexpected character '{}'", other))),
            }
            seen_any = true;
        }

        Ok(node)
    }
}

/// Parse a root spec with optional `^dependency` constraints
pub(super) fn parse_spec(input: &str) -> Result<AbstractSpec> {
    let mut parser = Parser::new(input);
    let mut root = parser.node()?;

    loop {
        parser.skip_ws();
        match parser.peek() {
            None => break,
            Some('^') => {
                parser.bump();
                let dep = parser.node()?;
                let Some(name) = dep.name.clone() else {
                    return Err(parser.error("a dependency after '^' must name a package"));
                };
                let merged = match root.dependencies.get(&name) {
                    Some(existing) => existing
                        .spec
                        .intersect(&dep)
                        .map_err(|e| parser.error(e.to_string()))?,
                    None => dep,
                };
                root.dependencies.insert(
                    name,
                    DependencyConstraint {
                        spec: merged,
                        deptypes: DepTypes::NONE,
                    },
                );
            }
            Some(c) => return Err(parser.error(format!("unexpected character '{}'", c))),
        }
    }

    Ok(root)
}

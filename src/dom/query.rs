//! CSS selector subset used by tools and the stable selector resolver.
//!
//! Supported: type and universal selectors, `#id`, `.class`, attribute
//! selectors (`[a]`, `=`, `*=`, `^=`, `$=`, `~=`), `:nth-of-type(n)`,
//! `:nth-child(n)`, `:first-child`, `:last-child`, descendant and child
//! combinators, and comma-separated groups.

use super::{Document, DomError, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList(Vec<Complex>);

#[derive(Debug, Clone, PartialEq)]
struct Complex {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Id(String),
    Class(String),
    Attr {
        name: String,
        test: Option<(AttrOp, String)>,
    },
    NthOfType(usize),
    NthChild(usize),
    LastChild,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AttrOp {
    Equals,
    Contains,
    Prefix,
    Suffix,
    Word,
}

impl SelectorList {
    pub fn parse(selector: &str) -> Result<Self, DomError> {
        let mut parser = Parser {
            src: selector,
            pos: 0,
        };
        let list = parser.list().map_err(|reason| DomError::InvalidSelector {
            selector: selector.to_string(),
            reason,
        })?;
        Ok(Self(list))
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        doc.is_element(node) && self.0.iter().any(|c| c.matches(doc, node))
    }
}

impl Complex {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.match_from(doc, node, self.compounds.len() - 1)
    }

    fn match_from(&self, doc: &Document, node: NodeId, idx: usize) -> bool {
        if !self.compounds[idx].matches(doc, node) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => doc
                .parent_element(node)
                .is_some_and(|p| self.match_from(doc, p, idx - 1)),
            Combinator::Descendant => doc
                .ancestors(node)
                .filter(|a| doc.is_element(*a))
                .any(|a| self.match_from(doc, a, idx - 1)),
        }
    }
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(tag) = doc.tag_name(node) else {
            return false;
        };
        if self.tag.as_deref().is_some_and(|t| t != tag) {
            return false;
        }
        self.filters.iter().all(|f| f.matches(doc, node))
    }
}

impl Filter {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        match self {
            Filter::Id(id) => doc.attr(node, "id") == Some(id.as_str()),
            Filter::Class(class) => doc.classes(node).any(|c| c == class.as_str()),
            Filter::Attr { name, test } => {
                let Some(actual) = doc.attr(node, name) else {
                    return false;
                };
                match test {
                    None => true,
                    Some((AttrOp::Equals, v)) => actual == v.as_str(),
                    Some((AttrOp::Contains, v)) => !v.is_empty() && actual.contains(v.as_str()),
                    Some((AttrOp::Prefix, v)) => !v.is_empty() && actual.starts_with(v.as_str()),
                    Some((AttrOp::Suffix, v)) => !v.is_empty() && actual.ends_with(v.as_str()),
                    Some((AttrOp::Word, v)) => actual.split_whitespace().any(|w| w == v.as_str()),
                }
            }
            Filter::NthOfType(n) => doc.index_of_type(node) == *n,
            Filter::NthChild(n) => doc.element_index(node) == *n,
            Filter::LastChild => doc.is_last_element_child(node),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        self.pos != start
    }

    fn list(&mut self) -> Result<Vec<Complex>, String> {
        let mut out = vec![self.complex()?];
        while self.eat(',') {
            out.push(self.complex()?);
        }
        if self.pos != self.src.len() {
            return Err(format!("unexpected character at offset {}", self.pos));
        }
        Ok(out)
    }

    fn complex(&mut self) -> Result<Complex, String> {
        self.skip_whitespace();
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_space = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.bump();
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_space => combinators.push(Combinator::Descendant),
                Some(c) => return Err(format!("unexpected '{c}'")),
            }
            compounds.push(self.compound()?);
        }
        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> Result<Compound, String> {
        let mut compound = Compound::default();
        let universal = self.eat('*');
        if !universal && self.peek().is_some_and(is_ident_char) {
            compound.tag = Some(self.ident()?.to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    compound.filters.push(Filter::Id(self.ident()?));
                }
                Some('.') => {
                    self.bump();
                    compound.filters.push(Filter::Class(self.ident()?));
                }
                Some('[') => {
                    self.bump();
                    compound.filters.push(self.attribute()?);
                }
                Some(':') => {
                    self.bump();
                    compound.filters.push(self.pseudo()?);
                }
                _ => break,
            }
        }
        if !universal && compound.tag.is_none() && compound.filters.is_empty() {
            return Err("expected a selector".to_string());
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, String> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err("dangling escape".to_string()),
                }
            } else if is_ident_char(c) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if out.is_empty() {
            Err("expected an identifier".to_string())
        } else {
            Ok(out)
        }
    }

    fn attribute(&mut self) -> Result<Filter, String> {
        self.skip_whitespace();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_whitespace();
        let op = match self.peek() {
            Some(']') => {
                self.bump();
                return Ok(Filter::Attr { name, test: None });
            }
            Some('=') => AttrOp::Equals,
            Some('*') => AttrOp::Contains,
            Some('^') => AttrOp::Prefix,
            Some('$') => AttrOp::Suffix,
            Some('~') => AttrOp::Word,
            _ => return Err(format!("bad attribute selector for '{name}'")),
        };
        self.bump();
        if op != AttrOp::Equals && !self.eat('=') {
            return Err(format!("bad attribute operator for '{name}'"));
        }
        self.skip_whitespace();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.quoted(q)?
            }
            _ => self.ident()?,
        };
        self.skip_whitespace();
        // Case-sensitivity flags are accepted and ignored.
        if self.peek().is_some_and(|c| c == 'i' || c == 's') {
            self.bump();
            self.skip_whitespace();
        }
        if !self.eat(']') {
            return Err("unterminated attribute selector".to_string());
        }
        Ok(Filter::Attr {
            name,
            test: Some((op, value)),
        })
    }

    fn quoted(&mut self, quote: char) -> Result<String, String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".to_string()),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err("dangling escape".to_string()),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn pseudo(&mut self) -> Result<Filter, String> {
        let name = self.ident()?.to_ascii_lowercase();
        match name.as_str() {
            "first-child" => Ok(Filter::NthChild(1)),
            "last-child" => Ok(Filter::LastChild),
            "first-of-type" => Ok(Filter::NthOfType(1)),
            "nth-of-type" | "nth-child" => {
                if !self.eat('(') {
                    return Err(format!(":{name} needs an argument"));
                }
                self.skip_whitespace();
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
                let n: usize = self.src[start..self.pos]
                    .parse()
                    .map_err(|_| format!("unsupported :{name} argument"))?;
                self.skip_whitespace();
                if !self.eat(')') || n == 0 {
                    return Err(format!("unsupported :{name} argument"));
                }
                Ok(if name == "nth-of-type" {
                    Filter::NthOfType(n)
                } else {
                    Filter::NthChild(n)
                })
            }
            other => Err(format!("unsupported pseudo-class :{other}")),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

//! Selector engine for the simulated DOM: a CSS subset and an XPath subset.
//!
//! CSS: type, `*`, `#id`, `.class`, `:nth-of-type(n)`, `:nth-child(n)`,
//! child (`>`) and descendant combinators, backslash and hex escapes.
//! XPath: absolute paths of `/` and `//` steps, `name` or `*` node tests,
//! `[n]` and `[@attr='value']` predicates.

use crate::dom::QueryError;
use std::collections::HashMap;

/// Minimal read-only view of an element tree rooted at `<html>`.
pub trait QueryTree {
    fn root(&self) -> usize;
    fn tag(&self, node: usize) -> &str;
    fn attr(&self, node: usize, name: &str) -> Option<&str>;
    fn parent(&self, node: usize) -> Option<usize>;
    fn children(&self, node: usize) -> &[usize];
}

/// All nodes in document (pre-)order.
pub fn document_order<T: QueryTree + ?Sized>(tree: &T) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![tree.root()];
    while let Some(node) = stack.pop() {
        out.push(node);
        for child in tree.children(node).iter().rev() {
            stack.push(*child);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// CSS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pseudo {
    NthOfType(usize),
    NthChild(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    pseudos: Vec<Pseudo>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.pseudos.is_empty()
    }

    fn matches<T: QueryTree + ?Sized>(&self, tree: &T, node: usize) -> bool {
        if let Some(tag) = &self.tag {
            if tree.tag(node) != tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if tree.attr(node, "id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = tree.attr(node, "class").unwrap_or("");
            let present: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| present.contains(&c.as_str())) {
                return false;
            }
        }
        self.pseudos.iter().all(|p| match p {
            Pseudo::NthOfType(n) => position_of_type(tree, node) == *n,
            Pseudo::NthChild(n) => position_among_children(tree, node) == *n,
        })
    }
}

fn position_of_type<T: QueryTree + ?Sized>(tree: &T, node: usize) -> usize {
    match tree.parent(node) {
        Some(parent) => {
            let tag = tree.tag(node);
            tree.children(parent)
                .iter()
                .filter(|c| tree.tag(**c) == tag)
                .position(|c| *c == node)
                .map(|i| i + 1)
                .unwrap_or(0)
        }
        None => 1,
    }
}

fn position_among_children<T: QueryTree + ?Sized>(tree: &T, node: usize) -> usize {
    match tree.parent(node) {
        Some(parent) => tree
            .children(parent)
            .iter()
            .position(|c| *c == node)
            .map(|i| i + 1)
            .unwrap_or(0),
        None => 1,
    }
}

/// A parsed CSS selector (single complex selector, no lists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssSelector {
    /// Each compound with its relation to the compound before it.
    parts: Vec<(Combinator, Compound)>,
}

impl CssSelector {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let invalid = || QueryError::InvalidSelector(input.to_string());
        let mut cursor = Cursor::new(input.trim());
        if cursor.at_end() {
            return Err(invalid());
        }

        let mut parts = Vec::new();
        let mut combinator = Combinator::Descendant;
        loop {
            let compound = parse_compound(&mut cursor).ok_or_else(invalid)?;
            if compound.is_empty() {
                return Err(invalid());
            }
            parts.push((combinator, compound));

            let had_space = cursor.skip_whitespace();
            if cursor.at_end() {
                break;
            }
            if cursor.peek() == Some('>') {
                cursor.bump();
                cursor.skip_whitespace();
                combinator = Combinator::Child;
            } else if had_space {
                combinator = Combinator::Descendant;
            } else {
                return Err(invalid());
            }
        }

        Ok(Self { parts })
    }

    pub fn matches<T: QueryTree + ?Sized>(&self, tree: &T, node: usize) -> bool {
        self.matches_at(tree, node, self.parts.len() - 1)
    }

    fn matches_at<T: QueryTree + ?Sized>(&self, tree: &T, node: usize, idx: usize) -> bool {
        let (combinator, compound) = &self.parts[idx];
        if !compound.matches(tree, node) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => tree
                .parent(node)
                .map_or(false, |p| self.matches_at(tree, p, idx - 1)),
            Combinator::Descendant => {
                let mut current = tree.parent(node);
                while let Some(ancestor) = current {
                    if self.matches_at(tree, ancestor, idx - 1) {
                        return true;
                    }
                    current = tree.parent(ancestor);
                }
                false
            }
        }
    }

    /// All matches in document order.
    pub fn select_all<T: QueryTree + ?Sized>(&self, tree: &T) -> Vec<usize> {
        document_order(tree)
            .into_iter()
            .filter(|n| self.matches(tree, *n))
            .collect()
    }
}

fn parse_compound(cursor: &mut Cursor) -> Option<Compound> {
    let mut compound = Compound::default();

    match cursor.peek() {
        Some('*') => {
            cursor.bump();
        }
        Some(c) if is_ident_start(c) || c == '\\' => {
            compound.tag = Some(parse_ident(cursor)?.to_ascii_lowercase());
        }
        _ => {}
    }

    loop {
        match cursor.peek() {
            Some('#') => {
                cursor.bump();
                compound.id = Some(parse_ident(cursor)?);
            }
            Some('.') => {
                cursor.bump();
                compound.classes.push(parse_ident(cursor)?);
            }
            Some(':') => {
                cursor.bump();
                let name = parse_ident(cursor)?.to_ascii_lowercase();
                if cursor.bump() != Some('(') {
                    return None;
                }
                cursor.skip_whitespace();
                let n = cursor.take_digits()?;
                cursor.skip_whitespace();
                if cursor.bump() != Some(')') {
                    return None;
                }
                match name.as_str() {
                    "nth-of-type" => compound.pseudos.push(Pseudo::NthOfType(n)),
                    "nth-child" => compound.pseudos.push(Pseudo::NthChild(n)),
                    _ => return None,
                }
            }
            _ => break,
        }
    }

    Some(compound)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Parse a CSS identifier, decoding escapes. Unescaped leading digits are invalid.
fn parse_ident(cursor: &mut Cursor) -> Option<String> {
    let mut out = String::new();
    let mut first = true;
    while let Some(c) = cursor.peek() {
        if c == '\\' {
            cursor.bump();
            out.push(parse_escape(cursor)?);
        } else if is_ident_char(c) {
            if first && c.is_ascii_digit() {
                return None;
            }
            if first && c == '-' && cursor.peek_second().is_some_and(|n| n.is_ascii_digit()) {
                return None;
            }
            cursor.bump();
            out.push(c);
        } else {
            break;
        }
        first = false;
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn parse_escape(cursor: &mut Cursor) -> Option<char> {
    let mut hex = String::new();
    while hex.len() < 6 {
        match cursor.peek() {
            Some(c) if c.is_ascii_hexdigit() => {
                hex.push(c);
                cursor.bump();
            }
            _ => break,
        }
    }
    if hex.is_empty() {
        return cursor.bump();
    }
    if cursor.peek() == Some(' ') {
        cursor.bump();
    }
    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
}

/// Escape a value for use as a CSS identifier (`#id`, `.class`), following
/// the CSSOM `CSS.escape` rules.
pub fn css_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let first = value.chars().next();
    let only_dash = value == "-";
    for (i, c) in value.chars().enumerate() {
        let leading_digit = c.is_ascii_digit() && (i == 0 || (i == 1 && first == Some('-')));
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if c.is_ascii_control() || leading_digit {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if only_dash {
            out.push_str("\\-");
        } else if is_ident_char(c) {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// XPath
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    AttrEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    descendant: bool,
    /// `None` matches any element (`*`).
    name: Option<String>,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    steps: Vec<Step>,
}

impl XPath {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let invalid = || QueryError::InvalidSelector(input.to_string());
        let mut cursor = Cursor::new(input.trim());
        let mut steps = Vec::new();

        while !cursor.at_end() {
            if cursor.bump() != Some('/') {
                return Err(invalid());
            }
            let descendant = if cursor.peek() == Some('/') {
                cursor.bump();
                true
            } else {
                false
            };

            let name = match cursor.peek() {
                Some('*') => {
                    cursor.bump();
                    None
                }
                _ => Some(cursor.take_while(is_ident_char).to_ascii_lowercase()),
            };
            if name.as_deref() == Some("") {
                return Err(invalid());
            }

            let mut predicates = Vec::new();
            while cursor.peek() == Some('[') {
                cursor.bump();
                predicates.push(parse_predicate(&mut cursor).ok_or_else(invalid)?);
                if cursor.bump() != Some(']') {
                    return Err(invalid());
                }
            }

            steps.push(Step {
                descendant,
                name,
                predicates,
            });
        }

        if steps.is_empty() {
            return Err(invalid());
        }
        Ok(Self { steps })
    }

    /// First selected node in document order.
    pub fn select_first<T: QueryTree + ?Sized>(&self, tree: &T) -> Option<usize> {
        let order: HashMap<usize, usize> = document_order(tree)
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect();

        // `None` stands for the document node above <html>.
        let mut context: Vec<Option<usize>> = vec![None];
        for step in &self.steps {
            let mut next: Vec<usize> = Vec::new();
            for ctx in &context {
                let parents = if step.descendant {
                    self_and_descendants(tree, *ctx)
                } else {
                    vec![*ctx]
                };
                for parent in parents {
                    next.extend(apply_step(tree, step, children_of(tree, parent)));
                }
            }
            next.sort_by_key(|n| order.get(n).copied().unwrap_or(usize::MAX));
            next.dedup();
            context = next.into_iter().map(Some).collect();
        }

        context.into_iter().flatten().next()
    }
}

fn parse_predicate(cursor: &mut Cursor) -> Option<Predicate> {
    cursor.skip_whitespace();
    let predicate = if cursor.peek() == Some('@') {
        cursor.bump();
        let attr = cursor.take_while(is_ident_char);
        if attr.is_empty() {
            return None;
        }
        cursor.skip_whitespace();
        if cursor.bump() != Some('=') {
            return None;
        }
        cursor.skip_whitespace();
        let quote = cursor.bump().filter(|q| *q == '\'' || *q == '"')?;
        let value = cursor.take_while(|c| c != quote);
        if cursor.bump() != Some(quote) {
            return None;
        }
        Predicate::AttrEquals(attr, value)
    } else {
        let n = cursor.take_digits()?;
        if n == 0 {
            return None;
        }
        Predicate::Position(n)
    };
    cursor.skip_whitespace();
    Some(predicate)
}

fn children_of<T: QueryTree + ?Sized>(tree: &T, node: Option<usize>) -> Vec<usize> {
    match node {
        Some(n) => tree.children(n).to_vec(),
        None => vec![tree.root()],
    }
}

fn self_and_descendants<T: QueryTree + ?Sized>(tree: &T, node: Option<usize>) -> Vec<Option<usize>> {
    let mut out = vec![node];
    let mut stack = children_of(tree, node);
    stack.reverse();
    while let Some(n) = stack.pop() {
        out.push(Some(n));
        for child in tree.children(n).iter().rev() {
            stack.push(*child);
        }
    }
    out
}

fn apply_step<T: QueryTree + ?Sized>(tree: &T, step: &Step, candidates: Vec<usize>) -> Vec<usize> {
    let mut nodes: Vec<usize> = candidates
        .into_iter()
        .filter(|n| step.name.as_deref().map_or(true, |name| tree.tag(*n) == name))
        .collect();
    for predicate in &step.predicates {
        nodes = match predicate {
            Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
            Predicate::AttrEquals(attr, value) => nodes
                .into_iter()
                .filter(|node| tree.attr(*node, attr) == Some(value.as_str()))
                .collect(),
        };
    }
    nodes
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_second(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    /// Skip whitespace, reporting whether any was skipped.
    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn take_digits(&mut self) -> Option<usize> {
        self.take_while(|c| c.is_ascii_digit()).parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// html > body > [div#main.card > (span, span.x, p), div > span]
    struct Fixture {
        tags: Vec<&'static str>,
        attrs: Vec<Vec<(&'static str, &'static str)>>,
        parents: Vec<Option<usize>>,
        children: Vec<Vec<usize>>,
    }

    impl Fixture {
        fn new() -> Self {
            let tags = vec!["html", "body", "div", "span", "span", "p", "div", "span"];
            let attrs = vec![
                vec![],
                vec![],
                vec![("id", "main"), ("class", "card wide")],
                vec![],
                vec![("class", "x")],
                vec![],
                vec![],
                vec![],
            ];
            let parents = vec![None, Some(0), Some(1), Some(2), Some(2), Some(2), Some(1), Some(6)];
            let children = vec![
                vec![1],
                vec![2, 6],
                vec![3, 4, 5],
                vec![],
                vec![],
                vec![],
                vec![7],
                vec![],
            ];
            Self {
                tags,
                attrs,
                parents,
                children,
            }
        }
    }

    impl QueryTree for Fixture {
        fn root(&self) -> usize {
            0
        }
        fn tag(&self, node: usize) -> &str {
            self.tags[node]
        }
        fn attr(&self, node: usize, name: &str) -> Option<&str> {
            self.attrs[node].iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
        }
        fn parent(&self, node: usize) -> Option<usize> {
            self.parents[node]
        }
        fn children(&self, node: usize) -> &[usize] {
            &self.children[node]
        }
    }

    fn css(sel: &str) -> Vec<usize> {
        CssSelector::parse(sel).unwrap().select_all(&Fixture::new())
    }

    #[test]
    fn test_css_basic_selectors() {
        assert_eq!(css("#main"), vec![2]);
        assert_eq!(css(".card.wide"), vec![2]);
        assert_eq!(css("span"), vec![3, 4, 7]);
        assert_eq!(css("div > span"), vec![3, 4, 7]);
        assert_eq!(css("#main span"), vec![3, 4]);
        assert_eq!(css("body > div:nth-of-type(2) > span"), vec![7]);
        assert_eq!(css("span:nth-of-type(2)"), vec![4]);
        assert_eq!(css("p:nth-child(3)"), vec![5]);
        assert_eq!(css("html > body > div:nth-of-type(1) > p"), vec![5]);
    }

    #[test]
    fn test_css_rejects_invalid_syntax() {
        for bad in ["", "//div[1]", "#123", "div >", "a..b", ":hover", "div[1]"] {
            assert!(
                matches!(CssSelector::parse(bad), Err(QueryError::InvalidSelector(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_css_escape_round_trip() {
        let escaped = css_escape("123-go");
        let parsed = CssSelector::parse(&format!("#{}", escaped)).unwrap();
        assert_eq!(parsed.parts[0].1.id.as_deref(), Some("123-go"));

        assert_eq!(css_escape("-1x"), "-\\31 x");
        assert_eq!(css_escape("-"), "\\-");
        assert_eq!(css_escape("-a1"), "-a1");
        let parsed = CssSelector::parse(&format!("#{}", css_escape("-1x"))).unwrap();
        assert_eq!(parsed.parts[0].1.id.as_deref(), Some("-1x"));
        let parsed = CssSelector::parse(&format!("#{}", css_escape("-"))).unwrap();
        assert_eq!(parsed.parts[0].1.id.as_deref(), Some("-"));

        let escaped = css_escape("user:name");
        assert_eq!(escaped, "user\\:name");
        let parsed = CssSelector::parse(&format!(".{}", escaped)).unwrap();
        assert_eq!(parsed.parts[0].1.classes, vec!["user:name".to_string()]);
    }

    #[test]
    fn test_xpath_selection() {
        let tree = Fixture::new();
        let first = |expr: &str| XPath::parse(expr).unwrap().select_first(&tree);
        assert_eq!(first("/html/body/div[2]/span"), Some(7));
        assert_eq!(first("//span[2]"), Some(4));
        assert_eq!(first("//div[@id='main']/p"), Some(5));
        assert_eq!(first("//*[@class=\"x\"]"), Some(4));
        assert_eq!(first("/html/body/table"), None);
    }

    #[test]
    fn test_xpath_rejects_unsupported() {
        for bad in ["div", "//div[text()='a']", "//", "//div[0]"] {
            assert!(XPath::parse(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }
}

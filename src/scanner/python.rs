//! Structural analysis of Python test sources on top of tree-sitter.
//!
//! One walk over the syntax tree collects mocking lines, tautological
//! assertions and large literal candidates.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use tree_sitter::{Node, Parser, Tree};

use crate::core::errors::{EntropyError, Result};
use crate::core::model::LiteralCandidate;
use crate::scanner::literal::{code_children, evaluate, node_text};

/// Case-insensitive substrings marking a callee as a mocking construct.
pub const MOCK_VOCABULARY: &[&str] = &["mock", "patch", "spy"];

/// Keyword / attribute names that configure a mock.
pub const MOCK_CONFIG_NAMES: &[&str] = &["return_value", "side_effect"];

/// Comparison operators that are always true for identical operands.
const REFLEXIVE_OPERATORS: &[&str] = &["==", "is", ">=", "<="];

const UNITTEST_TRUTH_ASSERTS: &[&str] = &["assertTrue", "assert_"];
const UNITTEST_PAIR_ASSERTS: &[&str] = &[
    "assertEqual",
    "assertEquals",
    "assertIs",
    "assertGreaterEqual",
    "assertLessEqual",
];

/// Build a parser configured for Python.
pub fn new_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| EntropyError::Runtime {
            details: format!("failed to load python grammar: {e}"),
        })?;
    Ok(parser)
}

/// Shape of a call site's callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// `name(...)`
    Named(String),
    /// `owner.attr(...)`, where `owner` may itself be an access chain.
    Attribute { owner: Box<Callee>, attr: String },
    /// Subscripts, lambdas and other computed callees.
    Other,
}

impl Callee {
    pub fn from_node(node: Node<'_>, source: &str) -> Self {
        match node.kind() {
            "identifier" => Self::Named(node_text(node, source).to_string()),
            "attribute" => {
                let owner = node
                    .child_by_field_name("object")
                    .map_or(Self::Other, |object| Self::from_node(object, source));
                let attr = node
                    .child_by_field_name("attribute")
                    .map_or_else(String::new, |attr| node_text(attr, source).to_string());
                Self::Attribute {
                    owner: Box::new(owner),
                    attr,
                }
            }
            // `patch("x")()` and friends: look through to the inner callee.
            "call" => node
                .child_by_field_name("function")
                .map_or(Self::Other, |function| Self::from_node(function, source)),
            _ => Self::Other,
        }
    }

    /// True if any name along the access chain matches the vocabulary.
    pub fn matches(&self, vocabulary: &[&str]) -> bool {
        match self {
            Self::Named(name) => name_matches(name, vocabulary),
            Self::Attribute { owner, attr } => {
                name_matches(attr, vocabulary) || owner.matches(vocabulary)
            }
            Self::Other => false,
        }
    }

    /// Final name in the chain.
    pub fn last_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) | Self::Attribute { attr: name, .. } => Some(name),
            Self::Other => None,
        }
    }
}

fn name_matches(name: &str, vocabulary: &[&str]) -> bool {
    let lowered = name.to_ascii_lowercase();
    vocabulary.iter().any(|word| lowered.contains(word))
}

/// Everything one structural pass learns about a file.
#[derive(Debug, Default)]
pub struct StructuralFindings {
    /// 0-based rows carrying at least one mocking construct.
    pub mock_rows: BTreeSet<usize>,
    pub tautology_detected: bool,
    pub literal_candidates: Vec<LiteralCandidate>,
}

/// Walk the whole tree once.
pub fn analyze(tree: &Tree, source: &str, literal_threshold: usize) -> StructuralFindings {
    let mut findings = StructuralFindings::default();
    walk(tree.root_node(), source, literal_threshold, &mut findings);
    findings
}

/// First syntax error location, if the tree has any.
pub fn first_syntax_error(tree: &Tree) -> Option<String> {
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return Some(format!(
                "syntax error at line {} column {}",
                pos.row + 1,
                pos.column + 1
            ));
        }
        let mut cursor = node.walk();
        let mut children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        children.reverse();
        stack.extend(children.into_iter().filter(Node::has_error));
    }
    Some("syntax error".to_string())
}

fn walk(node: Node<'_>, source: &str, literal_threshold: usize, findings: &mut StructuralFindings) {
    match node.kind() {
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                let callee = Callee::from_node(function, source);
                if callee.matches(MOCK_VOCABULARY) {
                    findings.mock_rows.insert(node.start_position().row);
                }
                if is_unittest_tautology(&callee, node, source) {
                    findings.tautology_detected = true;
                }
            }
        }
        "decorator" => {
            if let Some(expr) = code_children(node).first() {
                if matches!(expr.kind(), "identifier" | "attribute")
                    && Callee::from_node(*expr, source).matches(MOCK_VOCABULARY)
                {
                    findings.mock_rows.insert(node.start_position().row);
                }
            }
        }
        "keyword_argument" => {
            let configures_mock = node
                .child_by_field_name("name")
                .is_some_and(|name| MOCK_CONFIG_NAMES.contains(&node_text(name, source)));
            if configures_mock {
                findings.mock_rows.insert(node.start_position().row);
            }
        }
        "assignment" | "augmented_assignment" => {
            let configures_mock = node.child_by_field_name("left").is_some_and(|left| {
                left.kind() == "attribute"
                    && left
                        .child_by_field_name("attribute")
                        .is_some_and(|attr| MOCK_CONFIG_NAMES.contains(&node_text(attr, source)))
            });
            if configures_mock {
                findings.mock_rows.insert(node.start_position().row);
            }
        }
        "assert_statement" => {
            if code_children(node)
                .first()
                .is_some_and(|condition| is_tautological(*condition, source))
            {
                findings.tautology_detected = true;
            }
        }
        "dictionary" | "list" => {
            let rendered_len = node_text(node, source).chars().count();
            if rendered_len > literal_threshold {
                if let Ok(value) = evaluate(node, source) {
                    findings.literal_candidates.push(LiteralCandidate {
                        start: node.start_byte(),
                        end: node.end_byte(),
                        line: node.start_position().row + 1,
                        symbol: assigned_symbol(node, source),
                        value,
                    });
                    return;
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, literal_threshold, findings);
    }
}

/// Identifier a literal is directly assigned to (`name = {...}`).
fn assigned_symbol(node: Node<'_>, source: &str) -> Option<String> {
    let parent = node.parent()?;
    if parent.kind() != "assignment" {
        return None;
    }
    let right = parent.child_by_field_name("right")?;
    if right.id() != node.id() {
        return None;
    }
    let left = parent.child_by_field_name("left")?;
    (left.kind() == "identifier").then(|| node_text(left, source).to_string())
}

/// `assert <expr>` can never fail.
pub fn is_tautological(node: Node<'_>, source: &str) -> bool {
    let node = unwrap_parens(node);
    if constant_truthiness(node, source) == Some(true) {
        return true;
    }
    if node.kind() != "comparison_operator" {
        return false;
    }

    let mut cursor = node.walk();
    let mut operands = Vec::new();
    let mut operators = Vec::new();
    for child in node.children(&mut cursor) {
        if child.kind() == "comment" {
            continue;
        }
        if child.is_named() {
            operands.push(child);
        } else {
            operators.push(child.kind());
        }
    }

    matches!((operands.as_slice(), operators.as_slice()),
        ([left, right], [op]) if REFLEXIVE_OPERATORS.contains(op)
            && operands_equal(*left, *right, source))
}

fn is_unittest_tautology(callee: &Callee, call: Node<'_>, source: &str) -> bool {
    let Callee::Attribute { attr, .. } = callee else {
        return false;
    };
    let Some(arguments) = call.child_by_field_name("arguments") else {
        return false;
    };
    let positional: Vec<Node<'_>> = code_children(arguments)
        .into_iter()
        .filter(|arg| arg.kind() != "keyword_argument")
        .collect();

    if UNITTEST_TRUTH_ASSERTS.contains(&attr.as_str()) {
        return positional
            .first()
            .is_some_and(|arg| constant_truthiness(unwrap_parens(*arg), source) == Some(true));
    }
    if UNITTEST_PAIR_ASSERTS.contains(&attr.as_str()) {
        if let [first, second, ..] = positional.as_slice() {
            return operands_equal(*first, *second, source);
        }
    }
    false
}

/// Python truthiness of a constant expression; `None` when not constant.
fn constant_truthiness(node: Node<'_>, source: &str) -> Option<bool> {
    let node = unwrap_parens(node);
    match node.kind() {
        "true" => Some(true),
        "false" | "none" => Some(false),
        "integer" | "float" | "unary_operator" => match evaluate(node, source).ok()? {
            serde_json::Value::Number(n) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
            _ => None,
        },
        "string" | "concatenated_string" => match evaluate(node, source).ok()? {
            serde_json::Value::String(s) => Some(!s.is_empty()),
            _ => None,
        },
        // A non-empty display is truthy whatever its elements are.
        "list" | "tuple" | "set" | "dictionary" => Some(!code_children(node).is_empty()),
        "not_operator" => node
            .child_by_field_name("argument")
            .and_then(|arg| constant_truthiness(arg, source))
            .map(|truth| !truth),
        _ => None,
    }
}

fn unwrap_parens(mut node: Node<'_>) -> Node<'_> {
    while node.kind() == "parenthesized_expression" {
        match code_children(node).as_slice() {
            [inner] => node = *inner,
            _ => break,
        }
    }
    node
}

/// Same literal value, or structurally identical syntax trees.
pub fn operands_equal(left: Node<'_>, right: Node<'_>, source: &str) -> bool {
    let left = unwrap_parens(left);
    let right = unwrap_parens(right);
    if let (Ok(a), Ok(b)) = (evaluate(left, source), evaluate(right, source)) {
        return a == b;
    }
    structurally_equal(left, right, source)
}

/// Compare two subtrees by kind and leaf text, ignoring comments and layout.
pub fn structurally_equal(left: Node<'_>, right: Node<'_>, source: &str) -> bool {
    if left.kind() != right.kind() {
        return false;
    }
    let left_children = non_comment_children(left);
    let right_children = non_comment_children(right);
    if left_children.is_empty() && right_children.is_empty() {
        return node_text(left, source) == node_text(right, source);
    }
    left_children.len() == right_children.len()
        && left_children
            .iter()
            .zip(&right_children)
            .all(|(a, b)| structurally_equal(*a, *b, source))
}

fn non_comment_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

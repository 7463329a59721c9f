//! AST node handles and the bytecode-offset to node map.
//!
//! The interpreter never walks the AST; it only needs, per instruction, a
//! printable form of the originating expression and its source location for
//! tracing and the pry debugger. `Node` is that slice of the AST.

use std::fmt;
use std::sync::Arc;

/// A source location: file, 1-based line, 1-based column.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Loc {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Loc {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The interpreter-facing handle of an AST node: a printable expression
/// form plus an optional source location.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Node {
    expr: String,
    loc: Option<Loc>,
}

impl Node {
    pub fn new(expr: impl Into<String>, loc: Option<Loc>) -> Self {
        Self {
            expr: expr.into(),
            loc,
        }
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn loc(&self) -> Option<&Loc> {
        self.loc.as_ref()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

/// Sparse map from bytecode offset to the node that produced the
/// instruction there. Offsets are inserted in ascending order by the
/// compiler; lookup is an exact binary search. Absence of a mapping is
/// never an error.
#[derive(Clone, Debug, Default)]
pub struct NodeMap {
    offsets: Vec<u32>,
    nodes: Vec<Node>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Record that the instruction at `offset` came from `node`.
    /// Keeps the offsets sorted even if insertions arrive out of order.
    pub fn insert(&mut self, offset: u32, node: Node) {
        match self.offsets.binary_search(&offset) {
            Ok(i) => self.nodes[i] = node,
            Err(i) => {
                self.offsets.insert(i, offset);
                self.nodes.insert(i, node);
            }
        }
    }

    /// Node for the instruction at exactly `offset`, if any.
    pub fn find(&self, offset: u32) -> Option<&Node> {
        self.offsets
            .binary_search(&offset)
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Iterate `(offset, node)` pairs in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Node)> {
        self.offsets.iter().copied().zip(self.nodes.iter())
    }
}

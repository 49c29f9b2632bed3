use bson::{Bson, Document};
use regex::Regex;

/// A parsed filter document.
///
/// Shape validation happens entirely at parse time, so evaluation over a
/// document never has to re-check operand structure.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Every child must match. The top-level filter document is an
    /// implicit And of its entries; `And(vec![])` matches everything.
    And(Vec<Expression>),
    /// At least one child must match.
    Or(Vec<Expression>),
    /// At least one child must fail to match.
    Nor(Vec<Expression>),
    /// Negation of a whole sub-expression.
    Not(Box<Expression>),
    /// Named predicate resolved against the match context at evaluation
    /// time. Unknown names and panicking predicates count as "no match".
    Where(String),
    /// A condition on a single (possibly dotted) field path.
    Field { path: String, cond: FieldCond },
}

#[derive(Debug, Clone)]
pub enum FieldCond {
    /// Implicit equality against a literal value, including array and
    /// embedded-document literals.
    Literal(Bson),
    /// An operator sub-document; every operator must hold.
    Ops(Vec<FieldOp>),
}

#[derive(Debug, Clone)]
pub enum FieldOp {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
    Type(String),
    Mod { divisor: i64, remainder: i64 },
    Regex(Regex),
    /// Free-text lookup, delegated to the search collaborator.
    Text(String),
    /// Geometry containment, delegated to the geometry collaborator.
    GeoWithin(Document),
    /// Negation of a nested operator bag.
    Not(Vec<FieldOp>),
    All(Vec<Bson>),
    Size(i64),
    ElemMatch(ElemMatch),
}

#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// Sub-document form: each array element is matched as a document
    /// against a full filter expression.
    Query(Box<Expression>),
    /// Scalar form: each array element is tested against a bag of
    /// comparison operators.
    Ops(Vec<FieldOp>),
}

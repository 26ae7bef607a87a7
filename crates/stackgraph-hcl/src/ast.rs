//! Abstract Syntax Tree for HCL configuration files.
//!
//! Both the native syntax and the JSON dialect produce this tree. Only
//! the shapes the resolver needs are modeled precisely; operator
//! expressions are kept but never evaluated.

/// A body: the top level of a file, or the inside of a block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    /// Attribute assignments in declaration order.
    pub attributes: Vec<Attribute>,
    /// Nested blocks in declaration order.
    pub blocks: Vec<Block>,
}

impl Body {
    /// Returns the attribute named `name`, if declared.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Iterates over blocks of the given type.
    pub fn blocks_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    /// Returns the first block of the given type.
    #[must_use]
    pub fn first_block(&self, kind: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.kind == kind)
    }
}

/// An `name = expression` assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Assigned expression.
    pub expr: Expression,
}

/// A `kind "label" ... { body }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Block type (`module`, `include`, `locals`, ...).
    pub kind: String,
    /// Labels in declaration order.
    pub labels: Vec<String>,
    /// Block body.
    pub body: Body,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A string without interpolation.
    String(String),
    /// A string with `${...}` interpolations.
    Template(Vec<TemplatePart>),
    /// A numeric literal.
    Number(f64),
    /// A boolean literal.
    Bool(bool),
    /// `null`.
    Null,
    /// A tuple / list constructor.
    List(Vec<Expression>),
    /// An object constructor with its keys in declaration order.
    Object(Vec<(String, Expression)>),
    /// A variable traversal such as `local.env` or `dependency.vpc.outputs`.
    Traversal(Vec<String>),
    /// Index access `collection[key]`.
    Index {
        /// Indexed collection.
        collection: Box<Expression>,
        /// Key expression.
        key: Box<Expression>,
    },
    /// A function call.
    Call {
        /// Function name.
        name: String,
        /// Positional arguments.
        args: Vec<Expression>,
    },
    /// Any unary, binary, or conditional operation. Never evaluated.
    Operation(Vec<Expression>),
}

impl Expression {
    /// Returns the literal string value, if this is a plain string.
    ///
    /// Templates and computed expressions return `None`.
    #[must_use]
    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A segment of a template string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text.
    Literal(String),
    /// An interpolated expression.
    Interpolation(Expression),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_lookup_helpers() {
        let body = Body {
            attributes: vec![Attribute {
                name: "source".into(),
                expr: Expression::String("./x".into()),
            }],
            blocks: vec![
                Block {
                    kind: "module".into(),
                    labels: vec!["a".into()],
                    body: Body::default(),
                },
                Block {
                    kind: "locals".into(),
                    labels: vec![],
                    body: Body::default(),
                },
                Block {
                    kind: "module".into(),
                    labels: vec!["b".into()],
                    body: Body::default(),
                },
            ],
        };
        assert!(body.attribute("source").is_some());
        assert!(body.attribute("missing").is_none());
        assert_eq!(body.blocks_of("module").count(), 2);
        assert_eq!(
            body.first_block("module").map(|b| b.labels.clone()),
            Some(vec!["a".to_string()])
        );
    }

    #[test]
    fn only_plain_strings_are_literal() {
        assert_eq!(Expression::String("x".into()).as_literal_str(), Some("x"));
        let template = Expression::Template(vec![TemplatePart::Literal("x".into())]);
        assert!(template.as_literal_str().is_none());
    }
}

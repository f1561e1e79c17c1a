//! Value and filter expressions.
//!
//! Plain data variants; all dialect-aware rendering lives in
//! [crate::sql::gen_expr]. Builders mirror how consumers assemble filters:
//! `FilterExpr::and().eq(col("x"), 5.into())`.

use enum_as_inner::EnumAsInner;

use crate::types::{ColumnType, Literal};

/// Window functions usable in `extend` expressions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum WindowFn {
    RowNumber,
    Rank,
    DenseRank,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum ValueExpr {
    ConstVal {
        val: Literal,
    },
    ColRef {
        col: String,
    },
    WindowExpr {
        func: WindowFn,
    },
    /// Cast to the dialect's string type.
    AsString {
        val: Box<ValueExpr>,
    },
    CastExpr {
        val: Box<ValueExpr>,
        to: ColumnType,
    },
}

impl ValueExpr {
    pub fn constant(val: impl Into<Literal>) -> ValueExpr {
        ValueExpr::ConstVal { val: val.into() }
    }

    pub fn col(col: impl Into<String>) -> ValueExpr {
        ValueExpr::ColRef { col: col.into() }
    }

    pub fn window(func: WindowFn) -> ValueExpr {
        ValueExpr::WindowExpr { func }
    }

    pub fn as_string(self) -> ValueExpr {
        ValueExpr::AsString {
            val: Box::new(self),
        }
    }

    pub fn cast(self, to: ColumnType) -> ValueExpr {
        ValueExpr::CastExpr {
            val: Box::new(self),
            to,
        }
    }

    /// True when the expression is a compile-time constant.
    pub fn is_const(&self) -> bool {
        match self {
            ValueExpr::ConstVal { .. } => true,
            ValueExpr::AsString { val } => val.is_const(),
            _ => false,
        }
    }
}

/// Shorthand for [ValueExpr::col].
pub fn col(id: impl Into<String>) -> ValueExpr {
    ValueExpr::col(id)
}

/// Shorthand for [ValueExpr::constant].
pub fn constant(val: impl Into<Literal>) -> ValueExpr {
    ValueExpr::constant(val)
}

/// Binary relational operators.
///
/// The comparison group is valid on operands of any type; the text group
/// (`Begins` onward) only on strings, and only with a constant right-hand
/// side.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BinRelOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Begins,
    NotBegins,
    Ends,
    NotEnds,
    Contains,
    NotContains,
    In,
    NotIn,
}

impl BinRelOp {
    pub fn is_text_op(&self) -> bool {
        use BinRelOp::*;
        matches!(
            self,
            Begins | NotBegins | Ends | NotEnds | Contains | NotContains | In | NotIn
        )
    }

    /// SQL operator for the comparison group.
    pub(crate) fn sql_op(&self) -> Option<&'static str> {
        match self {
            BinRelOp::Eq => Some("="),
            BinRelOp::Ne => Some("<>"),
            BinRelOp::Gt => Some(">"),
            BinRelOp::Ge => Some(">="),
            BinRelOp::Lt => Some("<"),
            BinRelOp::Le => Some("<="),
            _ => None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum UnaryRelOp {
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum RelExpr {
    Bin {
        op: BinRelOp,
        lhs: ValueExpr,
        rhs: ValueExpr,
    },
    Unary { op: UnaryRelOp, arg: ValueExpr },
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BoolOp {
    And,
    Or,
}

/// A boolean tree of relational predicates.
///
/// Wire encoding is hand-written in [crate::json], not derived.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub op: BoolOp,
    pub args: Vec<FilterArg>,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum FilterArg {
    Rel(RelExpr),
    Sub(FilterExpr),
}

impl FilterExpr {
    pub fn and() -> FilterExpr {
        FilterExpr {
            op: BoolOp::And,
            args: vec![],
        }
    }

    pub fn or() -> FilterExpr {
        FilterExpr {
            op: BoolOp::Or,
            args: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn rel(mut self, op: BinRelOp, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.args.push(FilterArg::Rel(RelExpr::Bin { op, lhs, rhs }));
        self
    }

    pub fn eq(self, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.rel(BinRelOp::Eq, lhs, rhs)
    }

    pub fn ne(self, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.rel(BinRelOp::Ne, lhs, rhs)
    }

    pub fn gt(self, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.rel(BinRelOp::Gt, lhs, rhs)
    }

    pub fn ge(self, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.rel(BinRelOp::Ge, lhs, rhs)
    }

    pub fn lt(self, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.rel(BinRelOp::Lt, lhs, rhs)
    }

    pub fn le(self, lhs: ValueExpr, rhs: ValueExpr) -> FilterExpr {
        self.rel(BinRelOp::Le, lhs, rhs)
    }

    pub fn begins(self, lhs: ValueExpr, prefix: &str) -> FilterExpr {
        self.rel(BinRelOp::Begins, lhs, ValueExpr::constant(prefix))
    }

    pub fn ends(self, lhs: ValueExpr, suffix: &str) -> FilterExpr {
        self.rel(BinRelOp::Ends, lhs, ValueExpr::constant(suffix))
    }

    pub fn contains(self, lhs: ValueExpr, needle: &str) -> FilterExpr {
        self.rel(BinRelOp::Contains, lhs, ValueExpr::constant(needle))
    }

    pub fn is_in(self, lhs: ValueExpr, vals: Vec<Literal>) -> FilterExpr {
        self.rel(
            BinRelOp::In,
            lhs,
            ValueExpr::ConstVal {
                val: Literal::List(vals),
            },
        )
    }

    pub fn is_null(mut self, arg: ValueExpr) -> FilterExpr {
        self.args.push(FilterArg::Rel(RelExpr::Unary {
            op: UnaryRelOp::IsNull,
            arg,
        }));
        self
    }

    pub fn is_not_null(mut self, arg: ValueExpr) -> FilterExpr {
        self.args.push(FilterArg::Rel(RelExpr::Unary {
            op: UnaryRelOp::IsNotNull,
            arg,
        }));
        self
    }

    /// Nest another boolean subtree.
    pub fn subexpr(mut self, sub: FilterExpr) -> FilterExpr {
        self.args.push(FilterArg::Sub(sub));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_detection() {
        assert!(ValueExpr::constant(5).is_const());
        assert!(ValueExpr::constant("x").as_string().is_const());
        assert!(!col("x").is_const());
        assert!(!col("x").as_string().is_const());
    }

    #[test]
    fn text_op_classification() {
        assert!(BinRelOp::Contains.is_text_op());
        assert!(BinRelOp::NotIn.is_text_op());
        assert!(!BinRelOp::Eq.is_text_op());
        assert_eq!(BinRelOp::Ne.sql_op(), Some("<>"));
        assert_eq!(BinRelOp::Begins.sql_op(), None);
    }

    #[test]
    fn builder_nests() {
        let f = FilterExpr::and()
            .eq(col("a"), constant(1))
            .subexpr(FilterExpr::or().gt(col("b"), constant(2)).lt(col("b"), constant(0)));
        assert_eq!(f.args.len(), 2);
        assert!(f.args[1].is_sub());
    }
}

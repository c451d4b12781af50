//! Offset algebra.
//!
//! Every field of a compiled layout sits at `constant + Σ terms`, where the
//! constant is known when the schema is compiled and each term is the runtime
//! span of an earlier variable-length field. Encode, decode and frame
//! measurement all evaluate the same expressions, so the size routine and the
//! codec cannot disagree.

use std::fmt;

/// The runtime span of one earlier field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicTerm {
    /// Index of the contributing field in its layout.
    pub field: usize,
    /// Human-readable form, e.g. `count*4`.
    pub label: String,
}

/// `constant + Σ(dynamic terms)`, relative to the start of the owning layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetExpr {
    pub constant: usize,
    pub terms: Vec<DynamicTerm>,
}

impl OffsetExpr {
    pub fn fixed(constant: usize) -> Self {
        Self {
            constant,
            terms: Vec::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.terms.is_empty()
    }

    /// The offset if it needs no runtime input.
    pub fn static_value(&self) -> Option<usize> {
        self.is_static().then_some(self.constant)
    }

    /// Evaluate with the runtime spans of the layout's fields.
    ///
    /// `spans[i]` is the dynamic byte span of field `i`; only fields that
    /// precede this offset are ever read. `None` when the sum overflows.
    pub fn eval(&self, spans: &[usize]) -> Option<usize> {
        self.terms.iter().try_fold(self.constant, |acc, term| {
            acc.checked_add(spans.get(term.field).copied().unwrap_or(0))
        })
    }
}

impl fmt::Display for OffsetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constant)?;
        for term in &self.terms {
            write!(f, " + {}", term.label)?;
        }
        Ok(())
    }
}

/// How a variable-length field derives its runtime span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// `count(source) * scale`, where `source` is an earlier size field.
    Counted { source: usize, scale: usize },
    /// The dynamic tail of a nested struct.
    Nested,
}

/// Running position while laying out an ordered field list.
///
/// Each placement returns the field's offset and then advances by its static
/// width, appending a term when the field has a runtime span.
#[derive(Debug, Clone)]
pub struct Cursor {
    position: OffsetExpr,
}

impl Cursor {
    pub fn new(start: usize) -> Self {
        Self {
            position: OffsetExpr::fixed(start),
        }
    }

    pub fn place(&mut self, static_width: usize, term: Option<DynamicTerm>) -> OffsetExpr {
        let offset = self.position.clone();
        self.position.constant += static_width;
        if let Some(term) = term {
            self.position.terms.push(term);
        }
        offset
    }

    pub fn position(&self) -> &OffsetExpr {
        &self.position
    }

    pub fn finish(self) -> OffsetExpr {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(field: usize, label: &str) -> Option<DynamicTerm> {
        Some(DynamicTerm {
            field,
            label: label.to_string(),
        })
    }

    #[test]
    fn offsets_stay_static_until_the_first_dynamic_field() {
        let mut cursor = Cursor::new(1);
        let id = cursor.place(4, None);
        let count = cursor.place(2, None);
        let payload = cursor.place(0, term(2, "count"));
        let trailer = cursor.place(4, None);

        assert_eq!(id.static_value(), Some(1));
        assert_eq!(count.static_value(), Some(5));
        assert_eq!(payload.static_value(), Some(7));
        assert_eq!(trailer.static_value(), None);
        assert_eq!(trailer.to_string(), "7 + count");
        assert_eq!(cursor.finish().to_string(), "11 + count");
    }

    #[test]
    fn terms_accumulate_in_field_order() {
        let mut cursor = Cursor::new(0);
        cursor.place(1, None);
        cursor.place(0, term(1, "a*4"));
        cursor.place(1, None);
        cursor.place(1, term(3, "b"));
        let end = cursor.finish();

        assert_eq!(end.to_string(), "3 + a*4 + b");
        assert_eq!(end.eval(&[0, 12, 0, 5]), Some(3 + 12 + 5));
        assert_eq!(end.eval(&[0, usize::MAX, 0, 5]), None);
    }
}

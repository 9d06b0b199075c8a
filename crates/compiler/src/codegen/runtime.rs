//! Runtime ABI tables
//!
//! The generated C calls a fixed set of `hml_*` runtime symbols. This
//! module centralizes the name tables: the per-operator intrinsic map
//! (generic `hml_binary_op` constant plus the i32/i64 fast-path
//! functions), the unary map, and the literal formatting helpers.

use super::CodeGenError;
use crate::ast::{BinaryOp, UnaryOp};
use crate::utf8;

/// Emission entry for one binary operator.
pub(super) struct BinOpInfo {
    /// Constant passed to `hml_binary_op`.
    pub op_const: &'static str,
    /// i32 fast-path intrinsic, when one exists.
    pub i32_fn: Option<&'static str>,
    /// i64 fast-path intrinsic, when one exists.
    pub i64_fn: Option<&'static str>,
}

/// The fixed intrinsic table. Division has no fast path: it always
/// produces F64 through the generic runtime entry.
pub(super) fn bin_op_info(op: BinaryOp) -> BinOpInfo {
    let (op_const, i32_fn, i64_fn) = match op {
        BinaryOp::Add => ("HML_OP_ADD", Some("hml_i32_add"), Some("hml_i64_add")),
        BinaryOp::Sub => ("HML_OP_SUB", Some("hml_i32_sub"), Some("hml_i64_sub")),
        BinaryOp::Mul => ("HML_OP_MUL", Some("hml_i32_mul"), Some("hml_i64_mul")),
        BinaryOp::Div => ("HML_OP_DIV", None, None),
        BinaryOp::Mod => ("HML_OP_MOD", Some("hml_i32_mod"), Some("hml_i64_mod")),
        BinaryOp::Eq => ("HML_OP_EQ", Some("hml_i32_eq"), Some("hml_i64_eq")),
        BinaryOp::Ne => ("HML_OP_NE", Some("hml_i32_ne"), Some("hml_i64_ne")),
        BinaryOp::Lt => ("HML_OP_LT", Some("hml_i32_lt"), Some("hml_i64_lt")),
        BinaryOp::Le => ("HML_OP_LE", Some("hml_i32_le"), Some("hml_i64_le")),
        BinaryOp::Gt => ("HML_OP_GT", Some("hml_i32_gt"), Some("hml_i64_gt")),
        BinaryOp::Ge => ("HML_OP_GE", Some("hml_i32_ge"), Some("hml_i64_ge")),
        BinaryOp::BitAnd => (
            "HML_OP_BIT_AND",
            Some("hml_i32_bit_and"),
            Some("hml_i64_bit_and"),
        ),
        BinaryOp::BitOr => (
            "HML_OP_BIT_OR",
            Some("hml_i32_bit_or"),
            Some("hml_i64_bit_or"),
        ),
        BinaryOp::BitXor => (
            "HML_OP_BIT_XOR",
            Some("hml_i32_bit_xor"),
            Some("hml_i64_bit_xor"),
        ),
        BinaryOp::Shl => (
            "HML_OP_LSHIFT",
            Some("hml_i32_lshift"),
            Some("hml_i64_lshift"),
        ),
        BinaryOp::Shr => (
            "HML_OP_RSHIFT",
            Some("hml_i32_rshift"),
            Some("hml_i64_rshift"),
        ),
        // Logical operators lower to short-circuit control flow, never to
        // a runtime call; the constants exist for completeness.
        BinaryOp::And => ("HML_OP_AND", None, None),
        BinaryOp::Or => ("HML_OP_OR", None, None),
    };
    BinOpInfo {
        op_const,
        i32_fn,
        i64_fn,
    }
}

pub(super) fn unary_op_const(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "HML_OP_NEG",
        UnaryOp::Not => "HML_OP_NOT",
        UnaryOp::BitNot => "HML_OP_BIT_NOT",
    }
}

/// The C spelling of the operator inside native (unboxed) expressions.
pub(super) fn native_bin_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
    }
}

/// Render a Hemlock string as a C string literal, escaping quotes,
/// backslashes, control bytes, and all non-ASCII bytes. Octal escapes are
/// used because C hex escapes have no length limit and would swallow
/// following hex digits.
pub(super) fn c_string_literal(s: &str) -> Result<String, CodeGenError> {
    utf8::validate(s.as_bytes())?;
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for &b in s.as_bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out.push('"');
    Ok(out)
}

/// Format an f64 as a C double literal that round-trips.
pub(super) fn c_float_literal(v: f64) -> String {
    if !v.is_finite() {
        // Folded arithmetic never produces these; a literal in the source
        // would have been rejected upstream.
        return "0.0".to_string();
    }
    let text = format!("{:?}", v);
    if text.contains('.') || text.contains('e') || text.contains('E') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Format an i64 as a C integer literal, with the suffix needed once the
/// value leaves plain `int` range.
pub(super) fn c_int_literal(v: i64) -> String {
    if i32::try_from(v).is_ok() {
        format!("{}", v)
    } else if v == i64::MIN {
        // The literal 9223372036854775808 would overflow before negation.
        "(-9223372036854775807LL - 1)".to_string()
    } else {
        format!("{}LL", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_table_shapes() {
        let add = bin_op_info(BinaryOp::Add);
        assert_eq!(add.op_const, "HML_OP_ADD");
        assert_eq!(add.i32_fn, Some("hml_i32_add"));
        assert_eq!(add.i64_fn, Some("hml_i64_add"));
        // Division is generic-only.
        let div = bin_op_info(BinaryOp::Div);
        assert!(div.i32_fn.is_none() && div.i64_fn.is_none());
        assert_eq!(bin_op_info(BinaryOp::Shr).i32_fn, Some("hml_i32_rshift"));
    }

    #[test]
    fn string_literals_escape() {
        assert_eq!(c_string_literal("ab").unwrap(), "\"ab\"");
        assert_eq!(c_string_literal("a\"b\n").unwrap(), "\"a\\\"b\\n\"");
        // Non-ASCII bytes become octal escapes.
        assert_eq!(c_string_literal("é").unwrap(), "\"\\303\\251\"");
    }

    #[test]
    fn float_literals() {
        assert_eq!(c_float_literal(2.5), "2.5");
        assert_eq!(c_float_literal(4.0), "4.0");
    }

    #[test]
    fn int_literals() {
        assert_eq!(c_int_literal(42), "42");
        assert_eq!(c_int_literal(2_147_483_648), "2147483648LL");
        assert_eq!(c_int_literal(-5), "-5");
    }
}

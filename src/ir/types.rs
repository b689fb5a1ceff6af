//! Tensor and dispatch-argument types.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::ir::ParseError;

/// Scalar element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemType {
    F16,
    F32,
    F64,
    I1,
    I8,
    I32,
    I64,
    U32,
    U64,
}

impl ElemType {
    /// Storage width in bytes. `i1` is bit-packed and reported as 0 here;
    /// callers on the byte path must branch on [`ElemType::is_bit_packed`].
    pub fn byte_width(&self) -> usize {
        match self {
            ElemType::I1 => 0,
            ElemType::I8 => 1,
            ElemType::F16 => 2,
            ElemType::F32 | ElemType::I32 | ElemType::U32 => 4,
            ElemType::F64 | ElemType::I64 | ElemType::U64 => 8,
        }
    }

    pub fn is_bit_packed(&self) -> bool {
        matches!(self, ElemType::I1)
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        match text {
            "f16" => Ok(ElemType::F16),
            "f32" => Ok(ElemType::F32),
            "f64" => Ok(ElemType::F64),
            "i1" => Ok(ElemType::I1),
            "i8" => Ok(ElemType::I8),
            "i32" => Ok(ElemType::I32),
            "i64" => Ok(ElemType::I64),
            "u32" => Ok(ElemType::U32),
            "u64" => Ok(ElemType::U64),
            _ => Err(ParseError::Type {
                text: text.to_string(),
            }),
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ElemType::F16 => "f16",
            ElemType::F32 => "f32",
            ElemType::F64 => "f64",
            ElemType::I1 => "i1",
            ElemType::I8 => "i8",
            ElemType::I32 => "i32",
            ElemType::I64 => "i64",
            ElemType::U32 => "u32",
            ElemType::U64 => "u64",
        };
        f.write_str(text)
    }
}

/// A ranked tensor type, `tensor<2x3xf32>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dims: Vec<u64>,
    pub elem: ElemType,
}

impl TensorType {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Parse the inner `NxMx..xT` form (no `tensor<>` wrapper).
    pub fn parse_inner(text: &str) -> Result<Self, ParseError> {
        let mut pieces: Vec<&str> = text.split('x').collect();
        let elem_text = pieces.pop().ok_or_else(|| ParseError::Type {
            text: text.to_string(),
        })?;
        let elem = ElemType::parse(elem_text)?;
        let mut dims = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let dim: u64 = piece.parse().map_err(|_| ParseError::Type {
                text: text.to_string(),
            })?;
            dims.push(dim);
        }
        Ok(TensorType { dims, elem })
    }

    /// Parse the full `tensor<...>` form.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let inner = text
            .strip_prefix("tensor<")
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(|| ParseError::Type {
                text: text.to_string(),
            })?;
        Self::parse_inner(inner)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        for dim in &self.dims {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}>", self.elem)
    }
}

/// Any type expression appearing in an entry function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    Tensor(TensorType),
    BufferView,
    /// Any other type, carried verbatim (`!hal.fence`, `f32`, `index`, ...).
    Raw(String),
}

impl TypeExpr {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let text = text.trim();
        if text == "!hal.buffer_view" {
            Ok(TypeExpr::BufferView)
        } else if text.starts_with("tensor<") {
            Ok(TypeExpr::Tensor(TensorType::parse(text)?))
        } else if text.is_empty() {
            Err(ParseError::Type {
                text: text.to_string(),
            })
        } else {
            Ok(TypeExpr::Raw(text.to_string()))
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            TypeExpr::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Tensor(t) => t.fmt(f),
            TypeExpr::BufferView => f.write_str("!hal.buffer_view"),
            TypeExpr::Raw(text) => f.write_str(text),
        }
    }
}

/// Access mode of a kernel dispatch-tensor argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::ReadOnly => "readonly",
            Access::WriteOnly => "writeonly",
            Access::ReadWrite => "readwrite",
        })
    }
}

/// A kernel argument type, `!flow.dispatch.tensor<readonly:tensor<2x3xf32>>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchTensorType {
    pub access: Access,
    pub tensor: TensorType,
}

fn dispatch_tensor_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^!flow\.dispatch\.tensor<(readonly|writeonly|readwrite):tensor<((?:\d+x)+[fi]\d+)>>$")
            .expect("dispatch tensor pattern")
    })
}

impl DispatchTensorType {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let captures =
            dispatch_tensor_pattern()
                .captures(text.trim())
                .ok_or_else(|| ParseError::Type {
                    text: text.to_string(),
                })?;
        let access = match &captures[1] {
            "readonly" => Access::ReadOnly,
            "writeonly" => Access::WriteOnly,
            _ => Access::ReadWrite,
        };
        let tensor = TensorType::parse_inner(&captures[2])?;
        Ok(DispatchTensorType { access, tensor })
    }
}

impl fmt::Display for DispatchTensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!flow.dispatch.tensor<{}:{}>", self.access, self.tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_type_round_trip() {
        for text in ["tensor<2x3xf32>", "tensor<1x4x1x3xi1>", "tensor<f64>"] {
            let ty = TensorType::parse(text).unwrap();
            assert_eq!(ty.to_string(), text);
        }
    }

    #[test]
    fn dispatch_tensor_parse() {
        let ty =
            DispatchTensorType::parse("!flow.dispatch.tensor<readonly:tensor<2x3xf32>>").unwrap();
        assert_eq!(ty.access, Access::ReadOnly);
        assert_eq!(ty.tensor.dims, vec![2, 3]);
        assert_eq!(ty.tensor.elem, ElemType::F32);
        assert_eq!(
            ty.to_string(),
            "!flow.dispatch.tensor<readonly:tensor<2x3xf32>>"
        );
    }

    #[test]
    fn dispatch_tensor_requires_rank() {
        // The argument pattern requires at least one explicit dim.
        assert!(DispatchTensorType::parse("!flow.dispatch.tensor<readonly:tensor<f32>>").is_err());
    }

    #[test]
    fn type_expr_classifies() {
        assert_eq!(
            TypeExpr::parse("!hal.buffer_view").unwrap(),
            TypeExpr::BufferView
        );
        assert!(matches!(
            TypeExpr::parse("tensor<2xf32>").unwrap(),
            TypeExpr::Tensor(_)
        ));
        assert_eq!(
            TypeExpr::parse("index").unwrap(),
            TypeExpr::Raw("index".to_string())
        );
    }
}

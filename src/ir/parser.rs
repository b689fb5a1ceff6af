//! Text → [`Module`] parser.
//!
//! Line-oriented recursive descent over the dialect subset described in the
//! crate docs. Structural lines are matched by opcode prefix; kernel bodies
//! are captured verbatim by brace balance and never interpreted. Any op line
//! outside the enumerated set aborts the parse with the offending signature.

use std::collections::BTreeMap;

use crate::ir::types::{DispatchTensorType, TensorType, TypeExpr};
use crate::ir::{
    DispatchOp, EntryPoint, Executable, Func, FuncArg, Global, GlobalInit, Item, Kernel, KernelArg,
    Module, Op, OpKind, ParseError,
};
use crate::layout::Layout;

pub fn parse_module(text: &str) -> Result<Module, ParseError> {
    let mut cursor = Cursor::new(text);
    let (line_no, header) = cursor.next_significant("module header")?;
    let header = header
        .strip_suffix('{')
        .ok_or_else(|| syntax(line_no, "module header must end in `{`"))?
        .trim_end();
    let rest = header
        .strip_prefix("module")
        .ok_or_else(|| syntax(line_no, "expected `module`"))?
        .trim();
    let mut scan = Scan::new(rest, line_no);
    let name = if scan.peek() == Some('@') {
        Some(scan.parse_symbol()?)
    } else {
        None
    };
    scan.skip_ws();
    let attrs = if scan.eat_keyword("attributes") {
        scan.skip_ws();
        Some(scan.take_delimited('{', '}')?.trim().to_string())
    } else {
        None
    };

    let mut items = Vec::new();
    loop {
        let (line_no, line) = cursor.next_significant("item or `}`")?;
        if line == "}" {
            break;
        }
        if line.starts_with("util.global ") {
            items.push(Item::Global(parse_global(line, line_no)?));
        } else if line.starts_with("flow.executable ") {
            items.push(Item::Executable(parse_executable(&mut cursor, line, line_no)?));
        } else if line.starts_with("util.func ") {
            items.push(Item::Func(parse_func(&mut cursor, line, line_no)?));
        } else {
            return Err(ParseError::UnsupportedOp {
                line: line.to_string(),
            });
        }
    }
    Ok(Module { name, attrs, items })
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

fn parse_global(line: &str, line_no: usize) -> Result<Global, ParseError> {
    let mut scan = Scan::new(line.strip_prefix("util.global ").unwrap_or(line), line_no);
    let visibility = scan.parse_word()?;
    scan.skip_ws();
    let mutable = scan.eat_keyword("mutable");
    scan.skip_ws();
    let name = scan.parse_symbol()?;
    scan.skip_ws();
    scan.expect(":")?;
    scan.skip_ws();
    let ty_text = scan.take_type_text();
    let ty = TensorType::parse(&ty_text)?;
    scan.skip_ws();
    let init = if scan.eat_keyword("=") {
        scan.skip_ws();
        scan.expect("dense")?;
        let inner = scan.take_delimited('<', '>')?;
        let inner = inner.trim();
        let init = if let Some(hex) = inner
            .strip_prefix("\"0x")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            GlobalInit::Bytes(parse_hex(hex, line_no)?)
        } else {
            GlobalInit::Raw(inner.to_string())
        };
        scan.skip_ws();
        scan.expect(":")?;
        scan.skip_ws();
        TensorType::parse(&scan.take_type_text())?;
        Some(init)
    } else {
        None
    };
    Ok(Global {
        name,
        visibility,
        mutable,
        ty,
        init,
    })
}

fn parse_executable(
    cursor: &mut Cursor<'_>,
    header: &str,
    header_no: usize,
) -> Result<Executable, ParseError> {
    let header = header
        .strip_suffix('{')
        .ok_or_else(|| syntax(header_no, "executable header must end in `{`"))?
        .trim_end();
    let mut scan = Scan::new(
        header.strip_prefix("flow.executable ").unwrap_or(header),
        header_no,
    );
    let visibility = scan.parse_word()?;
    scan.skip_ws();
    let name = scan.parse_symbol()?;

    let (line_no, export_line) = cursor.next_significant("flow.executable.export")?;
    let mut scan = Scan::new(
        export_line
            .strip_prefix("flow.executable.export ")
            .ok_or_else(|| syntax(line_no, "expected `flow.executable.export`"))?,
        line_no,
    );
    let _export_vis = scan.parse_word()?;
    scan.skip_ws();
    let export_name = scan.parse_symbol()?;

    let (line_no, module_line) = cursor.next_significant("builtin.module")?;
    if module_line != "builtin.module {" {
        return Err(syntax(line_no, "expected `builtin.module {`"));
    }

    let (line_no, kernel_line) = cursor.next_significant("func.func kernel")?;
    let kernel = parse_kernel(cursor, kernel_line, line_no)?;

    for expected in ["}", "}"] {
        let (line_no, close) = cursor.next_significant("closing `}`")?;
        if close != expected {
            return Err(syntax(line_no, "expected closing `}`"));
        }
    }
    Ok(Executable {
        name,
        visibility,
        export_name,
        kernel,
    })
}

fn parse_kernel(
    cursor: &mut Cursor<'_>,
    sig_line: &str,
    line_no: usize,
) -> Result<Kernel, ParseError> {
    let sig = sig_line
        .strip_suffix('{')
        .ok_or_else(|| syntax(line_no, "kernel signature must end in `{`"))?
        .trim_end();
    let mut scan = Scan::new(
        sig.strip_prefix("func.func ")
            .ok_or_else(|| syntax(line_no, "expected `func.func`"))?,
        line_no,
    );
    let name = scan.parse_symbol()?;
    let arg_list = scan.take_delimited('(', ')')?;
    let mut args = Vec::new();
    for piece in split_top_level(&arg_list, ',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (arg_name, ty_text) = piece
            .split_once(':')
            .ok_or_else(|| syntax(line_no, "kernel argument must be `%name: type`"))?;
        args.push(KernelArg {
            name: arg_name.trim().to_string(),
            ty: DispatchTensorType::parse(ty_text.trim())?,
        });
    }
    scan.skip_ws();
    let mut layout_attrs = BTreeMap::new();
    let mut other_attrs = Vec::new();
    if scan.eat_keyword("attributes") {
        scan.skip_ws();
        let dict = scan.take_delimited('{', '}')?;
        for entry in split_top_level(&dict, ',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match parse_layout_attr(entry) {
                Some((index, layout)) => {
                    layout_attrs.insert(index, layout);
                }
                None => other_attrs.push(entry.to_string()),
            }
        }
    }

    // Opaque body: everything until the function's closing brace.
    let mut body = Vec::new();
    let mut depth = 1i32;
    loop {
        let (body_no, raw) = cursor
            .next_raw()
            .ok_or_else(|| syntax(line_no, "unterminated kernel body"))?;
        depth += brace_delta(raw);
        if depth <= 0 {
            if raw.trim() != "}" {
                return Err(syntax(body_no, "kernel body must close with a lone `}`"));
            }
            break;
        }
        body.push(raw.trim().to_string());
    }
    Ok(Kernel {
        name,
        args,
        layout_attrs,
        other_attrs,
        body,
    })
}

/// `fluidml.<i> = array<i64: ...>` → `(i, layout)`.
fn parse_layout_attr(entry: &str) -> Option<(usize, Layout)> {
    let (key, value) = entry.split_once('=')?;
    let index: usize = key.trim().strip_prefix("fluidml.")?.parse().ok()?;
    let value = value.trim();
    let inner = value.strip_prefix("array<i64")?.strip_suffix('>')?;
    let dims_text = inner.strip_prefix(':').unwrap_or(inner).trim();
    let mut dims = Vec::new();
    if !dims_text.is_empty() {
        for piece in dims_text.split(',') {
            dims.push(piece.trim().parse().ok()?);
        }
    }
    Some((index, Layout(dims)))
}

fn parse_func(cursor: &mut Cursor<'_>, header: &str, header_no: usize) -> Result<Func, ParseError> {
    let header = header
        .strip_suffix('{')
        .ok_or_else(|| syntax(header_no, "function header must end in `{`"))?
        .trim_end();
    let mut scan = Scan::new(
        header.strip_prefix("util.func ").unwrap_or(header),
        header_no,
    );
    let visibility = scan.parse_word()?;
    scan.skip_ws();
    let name = scan.parse_symbol()?;
    let arg_list = scan.take_delimited('(', ')')?;
    let mut args = Vec::new();
    for piece in split_top_level(&arg_list, ',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (arg_name, ty_text) = piece
            .split_once(':')
            .ok_or_else(|| syntax(header_no, "function argument must be `%name: type`"))?;
        args.push(FuncArg {
            name: arg_name.trim().to_string(),
            ty: TypeExpr::parse(ty_text)?,
        });
    }
    scan.skip_ws();
    let mut results = Vec::new();
    if scan.eat_keyword("->") {
        scan.skip_ws();
        if scan.peek() == Some('(') {
            let list = scan.take_delimited('(', ')')?;
            for piece in split_top_level(&list, ',') {
                if !piece.trim().is_empty() {
                    results.push(TypeExpr::parse(piece)?);
                }
            }
        } else {
            results.push(TypeExpr::parse(scan.rest())?);
        }
    }

    let mut ops = Vec::new();
    loop {
        let (line_no, line) = cursor.next_significant("op or `}`")?;
        if line == "}" {
            break;
        }
        ops.push(parse_op(line, line_no)?);
    }
    Ok(Func {
        name,
        visibility,
        args,
        results,
        ops,
    })
}

// ---------------------------------------------------------------------------
// Ops
// ---------------------------------------------------------------------------

fn parse_op(line: &str, line_no: usize) -> Result<Op, ParseError> {
    if line == "util.return" || line.starts_with("util.return ") {
        return parse_return(line, line_no);
    }
    let (results, rhs) = if line.starts_with('%') {
        let (lhs, rhs) = line
            .split_once(" = ")
            .ok_or_else(|| syntax(line_no, "expected `= <op>` after result list"))?;
        let results = lhs
            .split(',')
            .map(|name| name.trim().to_string())
            .collect::<Vec<_>>();
        (results, rhs.trim())
    } else {
        (Vec::new(), line)
    };

    let kind = if let Some(rest) = rhs.strip_prefix("flow.dispatch ") {
        parse_dispatch(rest, line_no)?
    } else if let Some(rest) = rhs.strip_prefix("flow.tensor.reshape ") {
        let (source, source_ty, result_ty) = parse_unary_cast(rest, line_no)?;
        OpKind::Reshape {
            source,
            source_ty: expect_tensor(source_ty, line_no)?,
            result_ty: expect_tensor(result_ty, line_no)?,
        }
    } else if let Some(rest) = rhs.strip_prefix("flow.tensor.update ") {
        parse_update(rest, line_no)?
    } else if let Some(rest) = rhs.strip_prefix("flow.tensor.splat ") {
        let mut scan = Scan::new(rest, line_no);
        let value = scan.parse_value()?;
        scan.skip_ws();
        scan.expect(":")?;
        let result_ty = TensorType::parse(scan.rest())?;
        OpKind::Splat { value, result_ty }
    } else if let Some(rest) = rhs.strip_prefix("flow.tensor.empty") {
        let ty_text = rest
            .trim()
            .strip_prefix(':')
            .ok_or_else(|| syntax(line_no, "expected `: tensor<...>`"))?;
        OpKind::Empty {
            result_ty: TensorType::parse(ty_text.trim())?,
        }
    } else if let Some(rest) = rhs.strip_prefix("hal.tensor.import ") {
        let (source, source_ty, result_ty) = parse_unary_cast(rest, line_no)?;
        OpKind::Import {
            source,
            source_ty,
            result_ty: expect_tensor(result_ty, line_no)?,
        }
    } else if let Some(rest) = rhs.strip_prefix("hal.tensor.export ") {
        let (source, source_ty, result_ty) = parse_unary_cast(rest, line_no)?;
        OpKind::Export {
            source,
            source_ty: expect_tensor(source_ty, line_no)?,
            result_ty,
        }
    } else if let Some(rest) = rhs.strip_prefix("hal.tensor.barrier ") {
        let mut scan = Scan::new(rest, line_no);
        let source = scan.parse_value()?;
        scan.skip_ws();
        scan.expect(":")?;
        OpKind::Barrier {
            source,
            ty: TensorType::parse(scan.rest())?,
        }
    } else if let Some(rest) = rhs.strip_prefix("util.global.load ") {
        let mut scan = Scan::new(rest, line_no);
        let global = scan.parse_symbol()?;
        scan.skip_ws();
        scan.expect(":")?;
        OpKind::GlobalLoad {
            global,
            result_ty: TensorType::parse(scan.rest())?,
        }
    } else if let Some(rest) = rhs.strip_prefix("arith.constant ") {
        let (value, ty_text) = rsplit_type(rest)
            .ok_or_else(|| syntax(line_no, "constant must end in `: type`"))?;
        OpKind::Constant {
            value: value.trim().to_string(),
            result_ty: TypeExpr::parse(ty_text)?,
        }
    } else {
        return Err(ParseError::UnsupportedOp {
            line: line.to_string(),
        });
    };
    Ok(Op { results, kind })
}

fn parse_return(line: &str, line_no: usize) -> Result<Op, ParseError> {
    let rest = line.strip_prefix("util.return").unwrap_or("").trim();
    let (values, types) = if rest.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let (value_text, type_text) = rest
            .split_once(" : ")
            .ok_or_else(|| syntax(line_no, "return values need `: type` list"))?;
        let values = value_text
            .split(',')
            .map(|v| v.trim().to_string())
            .collect::<Vec<_>>();
        let mut types = Vec::new();
        for piece in split_top_level(type_text, ',') {
            types.push(TypeExpr::parse(piece)?);
        }
        if values.len() != types.len() {
            return Err(syntax(line_no, "return value/type count mismatch"));
        }
        (values, types)
    };
    Ok(Op {
        results: Vec::new(),
        kind: OpKind::Return { values, types },
    })
}

fn parse_dispatch(rest: &str, line_no: usize) -> Result<OpKind, ParseError> {
    let mut scan = Scan::new(rest, line_no);
    let module = scan.parse_symbol()?;
    scan.expect("::")?;
    let func = scan.parse_symbol()?;
    let arg_list = scan.take_delimited('(', ')')?;
    let args: Vec<String> = split_top_level(&arg_list, ',')
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    scan.skip_ws();
    let attrs = if scan.peek() == Some('{') {
        Some(scan.take_delimited('{', '}')?.trim().to_string())
    } else {
        None
    };
    scan.skip_ws();
    scan.expect(":")?;
    scan.skip_ws();
    let type_list = scan.take_delimited('(', ')')?;
    let mut arg_types = Vec::new();
    for piece in split_top_level(&type_list, ',') {
        if !piece.trim().is_empty() {
            arg_types.push(TypeExpr::parse(piece)?);
        }
    }
    if arg_types.len() != args.len() {
        return Err(syntax(line_no, "dispatch operand/type count mismatch"));
    }
    scan.skip_ws();
    let mut result_types = Vec::new();
    if scan.eat_keyword("->") {
        scan.skip_ws();
        if scan.peek() == Some('(') {
            let list = scan.take_delimited('(', ')')?;
            for piece in split_top_level(&list, ',') {
                if !piece.trim().is_empty() {
                    result_types.push(TypeExpr::parse(piece)?);
                }
            }
        } else {
            result_types.push(TypeExpr::parse(scan.rest())?);
        }
    }
    let tied = parse_tied(attrs.as_deref(), result_types.len());
    Ok(OpKind::Dispatch(DispatchOp {
        entry: EntryPoint { module, func },
        args,
        arg_types,
        result_types,
        attrs,
        tied,
    }))
}

/// `tied_operands = [-1, 0, ...]` from a raw dispatch attribute dict.
fn parse_tied(attrs: Option<&str>, result_count: usize) -> Vec<Option<usize>> {
    let mut tied = vec![None; result_count];
    let Some(attrs) = attrs else {
        return tied;
    };
    let Some(start) = attrs.find("tied_operands") else {
        return tied;
    };
    let rest = &attrs[start..];
    let Some(open) = rest.find('[') else {
        return tied;
    };
    let Some(close) = rest[open..].find(']') else {
        return tied;
    };
    for (index, piece) in rest[open + 1..open + close].split(',').enumerate() {
        if index >= result_count {
            break;
        }
        let number = piece.trim().split_whitespace().next().unwrap_or("");
        if let Ok(value) = number.parse::<i64>() {
            if value >= 0 {
                tied[index] = Some(value as usize);
            }
        }
    }
    tied
}

/// `%v : TYPE -> TYPE` (import, export, reshape).
fn parse_unary_cast(
    rest: &str,
    line_no: usize,
) -> Result<(String, TypeExpr, TypeExpr), ParseError> {
    let mut scan = Scan::new(rest, line_no);
    let value = scan.parse_value()?;
    scan.skip_ws();
    scan.expect(":")?;
    let rest = scan.rest();
    let (from_text, to_text) = rest
        .split_once("->")
        .ok_or_else(|| syntax(line_no, "expected `type -> type`"))?;
    Ok((
        value,
        TypeExpr::parse(from_text)?,
        TypeExpr::parse(to_text)?,
    ))
}

fn parse_update(rest: &str, line_no: usize) -> Result<OpKind, ParseError> {
    let mut scan = Scan::new(rest, line_no);
    let update = scan.parse_value()?;
    scan.skip_ws();
    scan.expect(",")?;
    scan.skip_ws();
    let target = scan.parse_value()?;
    scan.skip_ws();
    scan.expect(":")?;
    let rest = scan.rest();
    let (update_text, target_text) = rest
        .split_once("->")
        .ok_or_else(|| syntax(line_no, "expected `type -> type`"))?;
    Ok(OpKind::Update {
        update,
        update_ty: TensorType::parse(update_text.trim())?,
        target,
        target_ty: TensorType::parse(target_text.trim())?,
    })
}

fn expect_tensor(ty: TypeExpr, line_no: usize) -> Result<TensorType, ParseError> {
    match ty {
        TypeExpr::Tensor(t) => Ok(t),
        other => Err(syntax(line_no, format!("expected tensor type, got `{other}`"))),
    }
}

/// Split `text : type` at the last top-level ` : `.
fn rsplit_type(text: &str) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut split_at = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'<' | b'[' | b'(' | b'{' => depth += 1,
            b'>' | b']' | b')' | b'}' => depth -= 1,
            b':' if depth == 0 => split_at = Some(i),
            _ => {}
        }
    }
    let at = split_at?;
    Some((&text[..at], &text[at + 1..]))
}

fn parse_hex(hex: &str, line_no: usize) -> Result<Vec<u8>, ParseError> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if hex.len() % 2 != 0 {
        return Err(syntax(line_no, "odd-length hex initial value"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| syntax(line_no, "invalid hex initial value"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Lexical helpers
// ---------------------------------------------------------------------------

fn syntax(line_no: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line_no,
        message: message.into(),
    }
}

/// Net `{`/`}` count of a line, ignoring braces inside string literals.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    for c in line.chars() {
        match c {
            '"' => in_string = !in_string,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Split on `sep` at bracket depth zero, respecting string literals.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_string = !in_string,
            _ if in_string => {}
            '<' | '[' | '(' | '{' => depth += 1,
            '>' | ']' | ')' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                pieces.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

struct Cursor<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor {
            lines: text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect(),
            pos: 0,
        }
    }

    fn next_raw(&mut self) -> Option<(usize, &'a str)> {
        let entry = self.lines.get(self.pos).copied();
        if entry.is_some() {
            self.pos += 1;
        }
        entry
    }

    /// Next non-blank, non-comment line, trimmed.
    fn next_significant(&mut self, expected: &str) -> Result<(usize, &'a str), ParseError> {
        while let Some((line_no, raw)) = self.next_raw() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            return Ok((line_no, line));
        }
        Err(syntax(
            self.lines.last().map(|(n, _)| *n).unwrap_or(0),
            format!("unexpected end of input, expected {expected}"),
        ))
    }
}

/// Character scanner over one structural line.
struct Scan<'a> {
    text: &'a str,
    pos: usize,
    line_no: usize,
}

impl<'a> Scan<'a> {
    fn new(text: &'a str, line_no: usize) -> Self {
        Scan { text, pos: 0, line_no }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ParseError> {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(syntax(
                self.line_no,
                format!("expected `{token}` at `{}`", truncate(self.rest())),
            ))
        }
    }

    fn eat_keyword(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn parse_word(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let rest = self.rest();
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(syntax(self.line_no, "expected a word"));
        }
        self.pos += end;
        Ok(rest[..end].to_string())
    }

    /// `@name` or `@"name"`, returning the bare name.
    fn parse_symbol(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let rest = self.rest();
        let rest = rest.strip_prefix('@').ok_or_else(|| {
            syntax(self.line_no, format!("expected `@symbol` at `{}`", truncate(rest)))
        })?;
        self.pos += 1;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| syntax(self.line_no, "unterminated quoted symbol"))?;
            self.pos += end + 2;
            Ok(quoted[..end].to_string())
        } else {
            let end = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$' || c == '.'))
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(syntax(self.line_no, "empty symbol"));
            }
            self.pos += end;
            Ok(rest[..end].to_string())
        }
    }

    /// `%name`, returned with its sigil.
    fn parse_value(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with('%') {
            return Err(syntax(
                self.line_no,
                format!("expected `%value` at `{}`", truncate(rest)),
            ));
        }
        let end = rest[1..]
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .map(|i| i + 1)
            .unwrap_or(rest.len());
        self.pos += end;
        Ok(rest[..end].to_string())
    }

    /// Consume `<open>...<close>` with nesting, returning the inner text.
    fn take_delimited(&mut self, open: char, close: char) -> Result<String, ParseError> {
        self.skip_ws();
        if self.peek() != Some(open) {
            return Err(syntax(
                self.line_no,
                format!("expected `{open}` at `{}`", truncate(self.rest())),
            ));
        }
        let rest = self.rest();
        let mut depth = 0i32;
        let mut in_string = false;
        for (i, c) in rest.char_indices() {
            match c {
                '"' => in_string = !in_string,
                _ if in_string => {}
                c if c == open => depth += 1,
                c if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        let inner = &rest[open.len_utf8()..i];
                        self.pos += i + close.len_utf8();
                        return Ok(inner.to_string());
                    }
                }
                _ => {}
            }
        }
        Err(syntax(self.line_no, format!("unbalanced `{open}...{close}`")))
    }

    /// Consume a type expression: a word that may contain balanced `<>`.
    fn take_type_text(&mut self) -> String {
        self.skip_ws();
        let rest = self.rest();
        let mut depth = 0i32;
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '<' => depth += 1,
                '>' => depth -= 1,
                c if c.is_whitespace() && depth == 0 => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        self.pos += end;
        rest[..end].to_string()
    }
}

fn truncate(text: &str) -> &str {
    &text[..text.len().min(24)]
}

//! [`Module`] → text printer.
//!
//! Emits the same dialect subset the parser accepts; printing then reparsing
//! is the identity on the model. Two-space indentation per nesting level.

use std::fmt::{self, Write as _};

use crate::ir::{
    DispatchOp, Executable, Func, Global, GlobalInit, Item, Kernel, Module, Op, OpKind,
};
use crate::layout::Layout;

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module")?;
        if let Some(name) = &self.name {
            write!(f, " @{name}")?;
        }
        if let Some(attrs) = &self.attrs {
            write!(f, " attributes {{{attrs}}}")?;
        }
        writeln!(f, " {{")?;
        for item in &self.items {
            match item {
                Item::Global(global) => write_global(f, global)?,
                Item::Executable(executable) => write_executable(f, executable)?,
                Item::Func(func) => write_func(f, func)?,
            }
        }
        writeln!(f, "}}")
    }
}

fn write_global(f: &mut fmt::Formatter<'_>, global: &Global) -> fmt::Result {
    write!(f, "  util.global {} ", global.visibility)?;
    if global.mutable {
        write!(f, "mutable ")?;
    }
    write!(f, "@{} : {}", global.name, global.ty)?;
    match &global.init {
        Some(GlobalInit::Bytes(bytes)) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                let _ = write!(hex, "{byte:02X}");
            }
            write!(f, " = dense<\"0x{hex}\"> : {}", global.ty)?;
        }
        Some(GlobalInit::Raw(raw)) => {
            write!(f, " = dense<{raw}> : {}", global.ty)?;
        }
        None => {}
    }
    writeln!(f)
}

fn write_executable(f: &mut fmt::Formatter<'_>, executable: &Executable) -> fmt::Result {
    writeln!(
        f,
        "  flow.executable {} @{} {{",
        executable.visibility, executable.name
    )?;
    writeln!(
        f,
        "    flow.executable.export public @{}",
        executable.export_name
    )?;
    writeln!(f, "    builtin.module {{")?;
    write_kernel(f, &executable.kernel)?;
    writeln!(f, "    }}")?;
    writeln!(f, "  }}")
}

fn write_kernel(f: &mut fmt::Formatter<'_>, kernel: &Kernel) -> fmt::Result {
    write!(f, "      func.func @{}(", kernel.name)?;
    for (i, arg) in kernel.args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", arg.name, arg.ty)?;
    }
    write!(f, ")")?;
    if !kernel.layout_attrs.is_empty() || !kernel.other_attrs.is_empty() {
        let mut entries: Vec<String> = kernel
            .layout_attrs
            .iter()
            .map(|(index, layout)| format!("fluidml.{index} = {}", array_i64(layout)))
            .collect();
        entries.extend(kernel.other_attrs.iter().cloned());
        write!(f, " attributes {{{}}}", entries.join(", "))?;
    }
    writeln!(f, " {{")?;
    for line in &kernel.body {
        writeln!(f, "        {line}")?;
    }
    writeln!(f, "      }}")
}

fn array_i64(layout: &Layout) -> String {
    if layout.as_slice().is_empty() {
        "array<i64>".to_string()
    } else {
        format!(
            "array<i64: {}>",
            layout
                .as_slice()
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

fn write_func(f: &mut fmt::Formatter<'_>, func: &Func) -> fmt::Result {
    write!(f, "  util.func {} @{}(", func.visibility, func.name)?;
    for (i, arg) in func.args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", arg.name, arg.ty)?;
    }
    write!(f, ")")?;
    match func.results.len() {
        0 => {}
        1 => write!(f, " -> {}", func.results[0])?,
        _ => {
            let list = func
                .results
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " -> ({list})")?;
        }
    }
    writeln!(f, " {{")?;
    for op in &func.ops {
        write!(f, "    ")?;
        write_op(f, op)?;
    }
    writeln!(f, "  }}")
}

fn write_op(f: &mut fmt::Formatter<'_>, op: &Op) -> fmt::Result {
    if !op.results.is_empty() {
        write!(f, "{} = ", op.results.join(", "))?;
    }
    match &op.kind {
        OpKind::Dispatch(dispatch) => write_dispatch(f, dispatch),
        OpKind::Reshape {
            source,
            source_ty,
            result_ty,
        } => writeln!(f, "flow.tensor.reshape {source} : {source_ty} -> {result_ty}"),
        OpKind::Update {
            update,
            update_ty,
            target,
            target_ty,
        } => writeln!(
            f,
            "flow.tensor.update {update}, {target} : {update_ty} -> {target_ty}"
        ),
        OpKind::Barrier { source, ty } => writeln!(f, "hal.tensor.barrier {source} : {ty}"),
        OpKind::Import {
            source,
            source_ty,
            result_ty,
        } => writeln!(f, "hal.tensor.import {source} : {source_ty} -> {result_ty}"),
        OpKind::Export {
            source,
            source_ty,
            result_ty,
        } => writeln!(f, "hal.tensor.export {source} : {source_ty} -> {result_ty}"),
        OpKind::Splat { value, result_ty } => {
            writeln!(f, "flow.tensor.splat {value} : {result_ty}")
        }
        OpKind::Empty { result_ty } => writeln!(f, "flow.tensor.empty : {result_ty}"),
        OpKind::GlobalLoad { global, result_ty } => {
            writeln!(f, "util.global.load @{global} : {result_ty}")
        }
        OpKind::Constant { value, result_ty } => {
            writeln!(f, "arith.constant {value} : {result_ty}")
        }
        OpKind::Return { values, types } => {
            if values.is_empty() {
                writeln!(f, "util.return")
            } else {
                let types = types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "util.return {} : {}", values.join(", "), types)
            }
        }
    }
}

fn write_dispatch(f: &mut fmt::Formatter<'_>, dispatch: &DispatchOp) -> fmt::Result {
    write!(
        f,
        "flow.dispatch @{}::@{}({})",
        dispatch.entry.module,
        dispatch.entry.func,
        dispatch.args.join(", ")
    )?;
    if let Some(attrs) = &dispatch.attrs {
        write!(f, " {{{attrs}}}")?;
    }
    let arg_types = dispatch
        .arg_types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    write!(f, " : ({arg_types})")?;
    match dispatch.result_types.len() {
        0 => writeln!(f),
        1 => writeln!(f, " -> {}", dispatch.result_types[0]),
        _ => {
            let results = dispatch
                .result_types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, " -> ({results})")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::parse_module;

    const ROUND_TRIP: &str = r#"module @demo {
  util.global private @weights : tensor<2x3xi32> = dense<"0x0102030405060708090A0B0C0D0E0F101112131415161718"> : tensor<2x3xi32>
  flow.executable private @ex {
    flow.executable.export public @kernel
    builtin.module {
      func.func @kernel(%arg0: !flow.dispatch.tensor<readonly:tensor<2x3xf32>>, %arg1: !flow.dispatch.tensor<writeonly:tensor<3x2xf32>>) attributes {fluidml.0 = array<i64: 0, 1>, fluidml.1 = array<i64: 1, 0>} {
        return
      }
    }
  }
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<2x3xf32>
    %1 = flow.dispatch @ex::@kernel(%0) : (tensor<2x3xf32>) -> tensor<3x2xf32>
    %2 = hal.tensor.export %1 : tensor<3x2xf32> -> !hal.buffer_view
    util.return %2 : !hal.buffer_view
  }
}
"#;

    #[test]
    fn print_parse_is_identity_on_model() {
        let module = parse_module(ROUND_TRIP).unwrap();
        let printed = module.to_string();
        let reparsed = parse_module(&printed).unwrap();
        assert_eq!(module, reparsed);
        // A second print is byte-stable.
        assert_eq!(reparsed.to_string(), printed);
    }

    #[test]
    fn printed_text_is_canonical() {
        let module = parse_module(ROUND_TRIP).unwrap();
        assert_eq!(module.to_string(), ROUND_TRIP);
    }
}

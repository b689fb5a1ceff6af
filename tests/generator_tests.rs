//! Generator scenarios: executable cloning and naming, dispatch rewrites,
//! global byte permutation (including 1-bit bools), identity round-trips,
//! and the missing-schedule-key fatal path.

use fluidml::generator::{self, GenerateError};
use fluidml::ir::{GlobalInit, Module};
use fluidml::{Layout, Schedule};

fn l(dims: &[usize]) -> Layout {
    Layout(dims.to_vec())
}

const IDENTITY_CHAIN: &str = r#"module {
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<4x3x2xf32>
    %1 = flow.tensor.reshape %0 : tensor<4x3x2xf32> -> tensor<4x3x2xf32>
    %2 = hal.tensor.export %1 : tensor<4x3x2xf32> -> !hal.buffer_view
    util.return %2 : !hal.buffer_view
  }
}
"#;

#[test]
fn identity_pipeline_is_byte_stable() {
    let mut schedule = Schedule::new();
    schedule.insert("%0", l(&[0, 1, 2]));
    schedule.insert("%1", l(&[0, 1, 2]));
    let generated = generator::generate(IDENTITY_CHAIN, &schedule).unwrap();
    assert_eq!(generated, IDENTITY_CHAIN);
}

const DISPATCH_MODULE: &str = r#"module {
  flow.executable private @ex {
    flow.executable.export public @relu
    builtin.module {
      func.func @relu(%arg0: !flow.dispatch.tensor<readonly:tensor<2x3xf32>>, %arg1: !flow.dispatch.tensor<writeonly:tensor<2x3xf32>>) {
        return
      }
    }
  }
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<2x3xf32>
    %1 = flow.dispatch @ex::@relu(%0) : (tensor<2x3xf32>) -> tensor<2x3xf32>
    %2 = hal.tensor.export %1 : tensor<2x3xf32> -> !hal.buffer_view
    util.return %2 : !hal.buffer_view
  }
}
"#;

#[test]
fn dispatch_rewrites_to_a_suffixed_clone() {
    let mut schedule = Schedule::new();
    schedule.insert("%0", l(&[1, 0]));
    schedule.insert("%1", l(&[1, 0]));
    let generated = generator::generate(DISPATCH_MODULE, &schedule).unwrap();
    let module = Module::parse(&generated).unwrap();

    // The clone sits at the top of the body, next to the original.
    let executables: Vec<_> = module.executables().collect();
    assert_eq!(executables.len(), 2);
    assert_eq!(executables[0].name, "ex_1x0_1x0");
    assert_eq!(executables[0].kernel.name, "relu_1x0_1x0");
    assert_eq!(executables[0].export_name, "relu_1x0_1x0");
    assert_eq!(executables[1].name, "ex");

    // The clone carries the layout annotations used to rename it.
    let kernel = &executables[0].kernel;
    assert_eq!(kernel.layout_attrs[&0], l(&[1, 0]));
    assert_eq!(kernel.layout_attrs[&1], l(&[1, 0]));

    // The dispatch references the clone.
    let func = module.entry_func().unwrap();
    let dispatch = func
        .ops
        .iter()
        .find_map(|op| match &op.kind {
            fluidml::ir::OpKind::Dispatch(d) => Some(d),
            _ => None,
        })
        .unwrap();
    assert_eq!(dispatch.entry.module, "ex_1x0_1x0");
    assert_eq!(dispatch.entry.func, "relu_1x0_1x0");
}

#[test]
fn repeated_layouts_share_one_clone() {
    let text = r#"module {
  flow.executable private @ex {
    flow.executable.export public @relu
    builtin.module {
      func.func @relu(%arg0: !flow.dispatch.tensor<readonly:tensor<2x3xf32>>, %arg1: !flow.dispatch.tensor<writeonly:tensor<2x3xf32>>) {
        return
      }
    }
  }
  util.func public @main$async(%arg0: !hal.buffer_view, %arg1: !hal.buffer_view) {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<2x3xf32>
    %1 = flow.dispatch @ex::@relu(%0) : (tensor<2x3xf32>) -> tensor<2x3xf32>
    %2 = hal.tensor.import %arg1 : !hal.buffer_view -> tensor<2x3xf32>
    %3 = flow.dispatch @ex::@relu(%2) : (tensor<2x3xf32>) -> tensor<2x3xf32>
    util.return
  }
}
"#;
    let mut schedule = Schedule::new();
    for value in ["%0", "%1", "%2", "%3"] {
        schedule.insert(value, l(&[1, 0]));
    }
    let generated = generator::generate(text, &schedule).unwrap();
    let module = Module::parse(&generated).unwrap();
    assert_eq!(module.executables().count(), 2);
}

#[test]
fn global_bytes_are_permuted() {
    // [[1, 2, 3], [4, 5, 6]] as row-major i32, transposed to
    // [[1, 4], [2, 5], [3, 6]].
    let before: Vec<u8> = [1i32, 2, 3, 4, 5, 6]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let hex: String = before.iter().map(|b| format!("{b:02X}")).collect();
    let text = format!(
        r#"module {{
  util.global private @table : tensor<2x3xi32> = dense<"0x{hex}"> : tensor<2x3xi32>
  util.func public @main$async() {{
    %0 = util.global.load @table : tensor<2x3xi32>
    util.return
  }}
}}
"#
    );
    let mut schedule = Schedule::new();
    schedule.insert("%0", l(&[1, 0]));
    let generated = generator::generate(&text, &schedule).unwrap();
    let module = Module::parse(&generated).unwrap();
    let global = module.find_global("table").unwrap();
    let expected: Vec<u8> = [1i32, 4, 2, 5, 3, 6]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    assert_eq!(global.init, Some(GlobalInit::Bytes(expected)));
}

#[test]
fn bool_globals_bit_pack_lsb_first() {
    // [[1, 0, 1], [0, 1, 1]] -> transposed [[1, 0], [0, 1], [1, 1]]
    let text = r#"module {
  util.global private @mask : tensor<2x3xi1> = dense<"0x35"> : tensor<2x3xi1>
  util.func public @main$async() {
    %0 = util.global.load @mask : tensor<2x3xi1>
    util.return
  }
}
"#;
    let mut schedule = Schedule::new();
    schedule.insert("%0", l(&[1, 0]));
    let generated = generator::generate(text, &schedule).unwrap();
    let module = Module::parse(&generated).unwrap();
    let global = module.find_global("mask").unwrap();
    assert_eq!(global.init, Some(GlobalInit::Bytes(vec![0x39])));
}

#[test]
fn generated_text_reparses() {
    let mut schedule = Schedule::new();
    schedule.insert("%0", l(&[0, 1]));
    schedule.insert("%1", l(&[1, 0]));
    let generated = generator::generate(DISPATCH_MODULE, &schedule).unwrap();
    let reparsed = Module::parse(&generated).unwrap();
    assert_eq!(reparsed.to_string(), generated);
}

#[test]
fn missing_schedule_key_is_fatal() {
    let schedule = Schedule::new();
    match generator::generate(DISPATCH_MODULE, &schedule) {
        Err(GenerateError::MissingKey { value }) => assert_eq!(value, "%0"),
        other => panic!("expected a missing-key error, got {other:?}"),
    }
}

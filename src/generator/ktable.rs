//! Memoised executable cloning.
//!
//! `(kernel name, layout tuple)` resolves to the entry point of a clone of
//! the matching executable, created on first use: the executable, its
//! export, and its inner kernel are renamed in lockstep with the layout
//! signature suffix, the kernel gets one `fluidml.<i>` attribute per arg,
//! and the clone is inserted at the top of the module body so later
//! dispatch rewrites see a consistent symbol table.

use std::collections::HashMap;

use crate::generator::GenerateError;
use crate::ir::{EntryPoint, Item, Module};
use crate::layout::{layouts_signature, Layout};

#[derive(Default)]
pub struct KTable {
    table: HashMap<(String, Vec<Layout>), EntryPoint>,
}

impl KTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry point for the kernel at the given per-arg layouts, cloning the
    /// source executable on a miss.
    pub fn lookup(
        &mut self,
        module: &mut Module,
        kernel: &str,
        layouts: &[Layout],
    ) -> Result<EntryPoint, GenerateError> {
        let key = (kernel.to_string(), layouts.to_vec());
        if let Some(entry) = self.table.get(&key) {
            return Ok(entry.clone());
        }
        let source = module
            .find_executable_by_kernel(kernel)
            .ok_or_else(|| GenerateError::UnknownKernel {
                kernel: kernel.to_string(),
            })?;
        let signature = layouts_signature(layouts);
        let mut clone = source.clone();
        clone.name = format!("{}_{signature}", clone.name);
        let kernel_name = format!("{}_{signature}", clone.kernel.name);
        clone.export_name = kernel_name.clone();
        clone.kernel.name = kernel_name.clone();
        clone.kernel.layout_attrs = layouts.iter().cloned().enumerate().collect();
        let entry = EntryPoint {
            module: clone.name.clone(),
            func: kernel_name,
        };
        module.items.insert(0, Item::Executable(clone));
        self.table.insert(key, entry.clone());
        Ok(entry)
    }
}

use std::collections::{BTreeMap, BTreeSet};

use crate::obj::{AccessClass, SymbolTable};

/// Per-segment resolution state, threaded explicitly through the passes.
///
/// The global symbol table and the cross-segment set of already-seen function
/// names are frozen for the lifetime of the context; everything else is built
/// up while splitting this one segment.
pub struct ResolutionContext<'a> {
    symbols: &'a SymbolTable,
    all_functions: BTreeSet<String>,
    pub segment_rom_start: u32,

    /// Function names defined in companion C source seen so far this segment.
    pub defined_funcs: BTreeSet<String>,

    labels_to_add: BTreeMap<u32, BTreeSet<u32>>,
    glabel_requests: BTreeMap<u32, String>,
    glabels_added: BTreeSet<String>,

    /// Register-indirect jumps observed, by instruction address.
    pub jtbl_jumps: BTreeMap<u32, u8>,
    /// Discovered jump tables: table address → owning function vram span.
    pub jumptables: BTreeMap<u32, (u32, u32)>,

    access: BTreeMap<u32, AccessClass>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(
        symbols: &'a SymbolTable,
        all_functions: BTreeSet<String>,
        segment_rom_start: u32,
    ) -> Self {
        Self {
            symbols,
            all_functions,
            segment_rom_start,
            defined_funcs: BTreeSet::new(),
            labels_to_add: BTreeMap::new(),
            glabel_requests: BTreeMap::new(),
            glabels_added: BTreeSet::new(),
            jtbl_jumps: BTreeMap::new(),
            jumptables: BTreeMap::new(),
            access: BTreeMap::new(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable { self.symbols }

    /// Canonical function name: the externally-supplied one if the symbol
    /// table has it, `func_<vram>` otherwise.
    pub fn func_name(&self, addr: u32) -> String {
        match self.symbols.function_name(addr) {
            Some(name) => name.to_string(),
            None => format!("func_{addr:X}"),
        }
    }

    /// Final display name for a function address, with the duplicate suffix
    /// applied once the name is known to collide across segments.
    pub fn final_func_name(&self, addr: u32) -> String {
        let name = self.func_name(addr);
        if self.is_duplicate(&name) {
            format!("{}_{:X}", name, self.segment_rom_start)
        } else {
            name
        }
    }

    fn is_duplicate(&self, name: &str) -> bool {
        self.glabels_added.contains(name) && self.all_functions.contains(name)
    }

    /// Records a call target that is not defined in companion source and so
    /// needs an external global label declaration.
    pub fn request_glabel(&mut self, addr: u32) {
        let name = self.func_name(addr);
        self.glabel_requests.insert(addr, name);
    }

    /// Marks a function's global label as emitted: drops any pending request
    /// for it and remembers the name for duplicate detection. Returns the
    /// final (possibly disambiguated) name to print.
    pub fn add_glabel(&mut self, addr: u32) -> String {
        self.glabel_requests.remove(&addr);
        let name = self.func_name(addr);
        self.glabels_added.insert(name);
        self.final_func_name(addr)
    }

    /// Glabel requests that never got a local declaration; these are external
    /// references, in address order.
    pub fn pending_glabels(&self) -> impl Iterator<Item = (&u32, &String)> {
        self.glabel_requests.iter()
    }

    /// Base names of every function whose global label this segment emitted.
    pub fn emitted_names(&self) -> &BTreeSet<String> { &self.glabels_added }

    pub fn add_label(&mut self, func_addr: u32, target: u32) {
        self.labels_to_add.entry(func_addr).or_default().insert(target);
    }

    /// Consumes the label for `vram` within `func_addr`, if one is pending.
    /// Each address yields its label exactly once.
    pub fn take_label(&mut self, func_addr: u32, vram: u32) -> bool {
        match self.labels_to_add.get_mut(&func_addr) {
            Some(labels) => labels.remove(&vram),
            None => false,
        }
    }

    pub fn leftover_labels(&self, func_addr: u32) -> usize {
        self.labels_to_add.get(&func_addr).map_or(0, |labels| labels.len())
    }

    pub fn clear_labels(&mut self, func_addr: u32) {
        self.labels_to_add.remove(&func_addr);
    }

    pub fn update_access(&mut self, addr: u32, class: AccessClass) {
        let entry = self.access.entry(addr).or_insert(class);
        *entry = entry.refine(class);
    }

    pub fn access(&self, addr: u32) -> Option<AccessClass> { self.access.get(&addr).copied() }

    /// Vram addresses that start functions already defined in companion
    /// source; the boundary detector force-ends in front of these.
    pub fn defined_function_starts(&self) -> BTreeSet<u32> {
        self.symbols
            .functions
            .values()
            .filter(|sym| self.defined_funcs.contains(&sym.name))
            .map(|sym| sym.address)
            .collect()
    }
}

use crate::module::abi::{ModuleTable, NAME_SEPARATOR};
use crate::module::{ModuleError, ModuleResult};
use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::os::raw::c_char;

/// One input slot of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    pub index: usize,
    pub default_value: f32,
}

/// Metadata of a module type, read once through its metadata entry points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<String>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, default_value: f32) -> Self {
        let index = self.inputs.len();
        self.inputs.push(InputPort {
            name: name.into(),
            index,
            default_value,
        });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Query a module's metadata entry points
    ///
    /// # Safety
    /// `table` must come from a loaded module whose metadata exports follow
    /// the ABI (NUL-terminated name strings, one default per input).
    pub unsafe fn from_table(name: &str, table: &ModuleTable) -> ModuleResult<Self> {
        let num_inputs = count("inputs", unsafe { (table.inputs)() })?;
        let num_outputs = count("outputs", unsafe { (table.outputs)() })?;

        let input_names = unsafe { split_names((table.input_names)()) };
        let output_names = unsafe { split_names((table.output_names)()) };

        if input_names.len() != num_inputs {
            return Err(ModuleError::InvalidMetadata(format!(
                "{name}: {num_inputs} inputs declared but {} input names",
                input_names.len()
            )));
        }
        if output_names.len() != num_outputs {
            return Err(ModuleError::InvalidMetadata(format!(
                "{name}: {num_outputs} outputs declared but {} output names",
                output_names.len()
            )));
        }

        let defaults_ptr = unsafe { (table.defaults)() };
        let defaults: &[f32] = if num_inputs == 0 {
            &[]
        } else if defaults_ptr.is_null() {
            return Err(ModuleError::InvalidMetadata(format!(
                "{name}: missing default values"
            )));
        } else {
            unsafe { std::slice::from_raw_parts(defaults_ptr, num_inputs) }
        };

        let mut descriptor = Self::new(name);
        for (input_name, default_value) in input_names.into_iter().zip(defaults) {
            descriptor = descriptor.with_input(input_name, *default_value);
        }
        descriptor.outputs = output_names;

        Ok(descriptor)
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Slot index of a named input
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs
            .iter()
            .find(|port| port.name == name)
            .map(|port| port.index)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|output| output == name)
    }

    pub fn default_value(&self, name: &str) -> Option<f32> {
        self.inputs
            .iter()
            .find(|port| port.name == name)
            .map(|port| port.default_value)
    }

    pub fn defaults(&self) -> Vec<f32> {
        self.inputs.iter().map(|port| port.default_value).collect()
    }
}

fn count(what: &str, value: i32) -> ModuleResult<usize> {
    usize::try_from(value)
        .map_err(|_| ModuleError::InvalidMetadata(format!("negative {what} count: {value}")))
}

/// # Safety
/// `names` must be null or a valid NUL-terminated string.
unsafe fn split_names(names: *const c_char) -> Vec<String> {
    if names.is_null() {
        return Vec::new();
    }
    let names = unsafe { CStr::from_ptr(names) }.to_string_lossy();
    parse_names(&names)
}

/// Split a separator-joined name list; an empty string means no names
pub fn parse_names(names: &str) -> Vec<String> {
    if names.trim().is_empty() {
        return Vec::new();
    }
    names
        .split(NAME_SEPARATOR)
        .map(|name| name.trim().to_string())
        .collect()
}

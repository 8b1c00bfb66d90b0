// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reader for the `.info` driver metadata the front end emits next to the
//! program. The format is a list of sections:
//! ```text
//! <pci_driver$__pci_register_driver>
//! probe::foo_probe
//! remove::foo_remove
//! </>
//! <whoop_network_shared_struct>
//! ::foo_init_shared
//! </>
//! ```
//! The header names the interface table API and, after `$`, the kernel
//! function it was registered with. Each entry line is `slot::function`.

use crate::ModelError;

/// The section that names the shared-struct initializer instead of
/// registering callbacks.
pub const SHARED_STRUCT_SECTION: &str = "whoop_network_shared_struct";

/// Terminates a section.
const SECTION_END: &str = "</>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEntry {
    /// The slot in the interface table, e.g. `ndo_open`
    pub api: String,
    /// The driver function registered in that slot
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoSection {
    pub api: String,
    pub kernel_func: String,
    pub entries: Vec<InfoEntry>,
}

impl InfoSection {
    pub fn new(api: &str, kernel_func: &str, entries: &[(&str, &str)]) -> Self {
        InfoSection {
            api: api.to_string(),
            kernel_func: kernel_func.to_string(),
            entries: entries
                .iter()
                .map(|(api, function)| InfoEntry { api: api.to_string(), function: function.to_string() })
                .collect(),
        }
    }

    pub fn is_shared_struct(&self) -> bool {
        self.api == SHARED_STRUCT_SECTION
    }
}

fn malformed(line: usize, reason: impl Into<String>) -> ModelError {
    ModelError::MalformedInfo { line, reason: reason.into() }
}

/// Parse the sections of a `.info` file. Blank lines between sections are
/// ignored.
pub fn parse(text: &str) -> Result<Vec<InfoSection>, ModelError> {
    let mut sections = Vec::new();
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim_end_matches('\r')));

    while let Some((line_no, line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        let header = line
            .strip_prefix('<')
            .and_then(|l| l.strip_suffix('>'))
            .filter(|h| !h.is_empty() && !h.starts_with('/'))
            .ok_or_else(|| malformed(line_no, format!("expected a section header, found `{line}`")))?;
        let (api, kernel_func) = header.split_once('$').unwrap_or((header, ""));

        let mut section = InfoSection { api: api.to_string(), kernel_func: kernel_func.to_string(), entries: Vec::new() };
        let mut terminated = false;
        for (line_no, line) in lines.by_ref() {
            if line == SECTION_END {
                terminated = true;
                break;
            }
            let (slot, function) = line
                .split_once("::")
                .ok_or_else(|| malformed(line_no, format!("expected `slot::function`, found `{line}`")))?;
            section.entries.push(InfoEntry { api: slot.to_string(), function: function.to_string() });
        }
        if !terminated {
            return Err(malformed(line_no, format!("section `{header}` is not terminated by `{SECTION_END}`")));
        }
        if section.is_shared_struct() && section.entries.len() != 1 {
            return Err(malformed(line_no, "the shared struct section must name exactly one function"));
        }
        sections.push(section);
    }
    Ok(sections)
}

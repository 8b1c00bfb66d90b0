// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The pair report consumed by downstream tooling:
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <driver name="foo">
//!   <pair ep1="foo_open" ep2="foo_read" bug="false" />
//! </driver>
//! ```

use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    pub ep1: String,
    pub ep2: String,
    /// Set once the verifier reports a race for this pair
    pub bug: bool,
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Write the report for `driver`.
pub fn write_pairs<W: Write>(writer: &mut W, driver: &str, pairs: &[PairOutcome]) -> std::io::Result<()> {
    writeln!(writer, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
    if pairs.is_empty() {
        return writeln!(writer, "<driver name=\"{}\" />", escape(driver));
    }
    writeln!(writer, "<driver name=\"{}\">", escape(driver))?;
    for pair in pairs {
        writeln!(
            writer,
            "  <pair ep1=\"{}\" ep2=\"{}\" bug=\"{}\" />",
            escape(&pair.ep1),
            escape(&pair.ep2),
            pair.bug
        )?;
    }
    writeln!(writer, "</driver>")
}

//! Serialize a [`ClassDef`] back to smali text.
//!
//! Output follows apktool's layout: header, verbatim preamble, then each
//! method with a four-space body indent and labels on their own lines.

use crate::smali::pool::{ClassDef, MethodDef};
use std::fmt::Write;

pub fn write_class(class: &ClassDef) -> String {
    let mut out = String::new();

    // fmt::Write to a String is infallible; results are discarded throughout.
    let _ = write!(out, ".class");
    for flag in &class.access {
        let _ = write!(out, " {flag}");
    }
    let _ = writeln!(out, " {}", class.descriptor);

    if let Some(sup) = &class.super_descriptor {
        let _ = writeln!(out, ".super {sup}");
    }
    if let Some(source) = &class.source {
        let _ = writeln!(out, ".source \"{source}\"");
    }

    if !class.interfaces.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "# interfaces");
        for iface in &class.interfaces {
            let _ = writeln!(out, ".implements {iface}");
        }
    }

    if !class.preamble.is_empty() {
        let _ = writeln!(out);
        for line in &class.preamble {
            let _ = writeln!(out, "{line}");
        }
    }

    for method in &class.methods {
        let _ = writeln!(out);
        write_method(&mut out, method);
    }

    out
}

fn write_method(out: &mut String, method: &MethodDef) {
    let _ = write!(out, ".method");
    for flag in &method.access {
        let _ = write!(out, " {flag}");
    }
    let _ = writeln!(out, " {}{}", method.name, method.descriptor.as_str());
    let _ = writeln!(out, "    {}", method.registers.directive());

    for insn in &method.instructions {
        let _ = writeln!(out);
        for label in &insn.labels {
            let _ = writeln!(out, "    :{label}");
        }
        let _ = writeln!(out, "    {insn}");
    }
    for label in &method.trailing_labels {
        let _ = writeln!(out, "    :{label}");
    }

    let _ = writeln!(out, ".end method");
}

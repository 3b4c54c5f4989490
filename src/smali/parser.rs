//! Line-oriented parser for the apktool smali subset the engine models.
//!
//! Class header, `.implements`, and method bodies are parsed into the pool
//! model; everything else between the header and the first method (fields,
//! annotation blocks) is preserved verbatim so untouched classes round-trip.

use crate::smali::errors::SmaliError;
use crate::smali::insn::Instruction;
use crate::smali::pool::{ClassDef, MethodDef, MethodDescriptor, RegisterSpec};

pub fn parse_class(text: &str, file: &str) -> Result<ClassDef, SmaliError> {
    let mut class: Option<ClassDef> = None;
    let mut lines = text.lines().enumerate();

    while let Some((idx, raw)) = lines.next() {
        let lineno = idx + 1;
        let line = raw.trim();
        // Comments are layout the writer regenerates (`# interfaces`,
        // `# direct methods`); storing them would duplicate on round-trip.
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix(".class ") {
            let mut tokens: Vec<&str> = rest.split_whitespace().collect();
            let descriptor = tokens
                .pop()
                .filter(|d| d.starts_with('L') && d.ends_with(';'))
                .ok_or_else(|| SmaliError::parse(file, lineno, "malformed .class directive"))?;
            class = Some(ClassDef {
                descriptor: descriptor.to_string(),
                access: tokens.iter().map(|t| t.to_string()).collect(),
                super_descriptor: None,
                interfaces: Vec::new(),
                source: None,
                preamble: Vec::new(),
                methods: Vec::new(),
                path: None,
                dirty: false,
            });
            continue;
        }

        let class_ref = class
            .as_mut()
            .ok_or_else(|| SmaliError::parse(file, lineno, "directive before .class"))?;

        if let Some(rest) = line.strip_prefix(".super ") {
            class_ref.super_descriptor = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(".source ") {
            class_ref.source = Some(rest.trim().trim_matches('"').to_string());
        } else if let Some(rest) = line.strip_prefix(".implements ") {
            class_ref.interfaces.push(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(".method ") {
            let method = parse_method(rest, &mut lines, file)?;
            class_ref.methods.push(method);
        } else {
            class_ref.preamble.push(raw.to_string());
        }
    }

    class.ok_or_else(|| SmaliError::parse(file, 1, "no .class directive found"))
}

fn parse_method<'a, I>(
    signature: &str,
    lines: &mut I,
    file: &str,
) -> Result<MethodDef, SmaliError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut tokens: Vec<&str> = signature.split_whitespace().collect();
    let sig = tokens
        .pop()
        .ok_or_else(|| SmaliError::parse(file, 0, "empty .method signature"))?;
    let paren = sig
        .find('(')
        .ok_or_else(|| SmaliError::parse(file, 0, format!("method signature '{sig}' has no descriptor")))?;
    let (name, descriptor_raw) = sig.split_at(paren);
    let descriptor = MethodDescriptor::parse(descriptor_raw)?;

    let mut method = MethodDef {
        name: name.to_string(),
        descriptor,
        access: tokens.iter().map(|t| t.to_string()).collect(),
        registers: RegisterSpec::Locals(0),
        instructions: Vec::new(),
        trailing_labels: Vec::new(),
    };

    let mut pending_labels: Vec<String> = Vec::new();

    for (idx, raw) in lines.by_ref() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == ".end method" {
            method.trailing_labels = pending_labels;
            return Ok(method);
        }
        if let Some(label) = line.strip_prefix(':') {
            pending_labels.push(label.to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix(".locals ") {
            method.registers = RegisterSpec::Locals(parse_count(rest, file, lineno)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix(".registers ") {
            method.registers = RegisterSpec::Registers(parse_count(rest, file, lineno)?);
            continue;
        }

        let mut insn = Instruction::parse(line);
        insn.labels = std::mem::take(&mut pending_labels);
        method.instructions.push(insn);
    }

    Err(SmaliError::parse(
        file,
        0,
        format!("method '{}' missing .end method", method.name),
    ))
}

fn parse_count(rest: &str, file: &str, lineno: usize) -> Result<u16, SmaliError> {
    rest.trim()
        .parse()
        .map_err(|_| SmaliError::parse(file, lineno, format!("invalid register count '{rest}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smali::pool::ReturnKind;

    const VERIFIER: &str = r#"
.class public Lcom/example/net/PinnedHostnameVerifier;
.super Ljava/lang/Object;
.source "PinnedHostnameVerifier.java"

# interfaces
.implements Ljavax/net/ssl/HostnameVerifier;

.field private final pins:Ljava/util/Set;

.method public constructor <init>()V
    .locals 0

    invoke-direct {p0}, Ljava/lang/Object;-><init>()V

    return-void
.end method

.method public verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z
    .locals 1

    iget-object v0, p0, Lcom/example/net/PinnedHostnameVerifier;->pins:Ljava/util/Set;

    invoke-interface {v0, p1}, Ljava/util/Set;->contains(Ljava/lang/Object;)Z

    move-result v0

    if-eqz v0, :cond_0

    const/4 v0, 0x1

    return v0

    :cond_0
    const/4 v0, 0x0

    return v0
.end method
"#;

    #[test]
    fn parses_header_and_methods() {
        let class = parse_class(VERIFIER, "PinnedHostnameVerifier.smali").unwrap();
        assert_eq!(class.descriptor, "Lcom/example/net/PinnedHostnameVerifier;");
        assert_eq!(class.access, vec!["public"]);
        assert_eq!(class.super_descriptor.as_deref(), Some("Ljava/lang/Object;"));
        assert!(class.implements("Ljavax/net/ssl/HostnameVerifier;"));
        assert_eq!(class.simple_name(), "PinnedHostnameVerifier");
        assert_eq!(class.methods.len(), 2);
        assert!(class
            .preamble
            .iter()
            .any(|l| l.contains(".field private final pins")));
    }

    #[test]
    fn parses_method_body_with_labels() {
        let class = parse_class(VERIFIER, "PinnedHostnameVerifier.smali").unwrap();
        let verify = &class.methods[1];
        assert_eq!(verify.name, "verify");
        assert_eq!(verify.descriptor.return_kind(), ReturnKind::Single);
        assert_eq!(verify.registers, RegisterSpec::Locals(1));

        let labeled: Vec<_> = verify
            .instructions
            .iter()
            .filter(|i| !i.labels.is_empty())
            .collect();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].labels, vec!["cond_0"]);
        assert_eq!(labeled[0].mnemonic, "const/4");

        let referenced: Vec<_> = verify.referenced_labels().collect();
        assert_eq!(referenced, vec!["cond_0"]);
    }

    #[test]
    fn missing_end_method_is_an_error() {
        let bad = ".class public Lcom/a/B;\n.method public x()V\n    .locals 0\n    return-void\n";
        let err = parse_class(bad, "B.smali").unwrap_err();
        assert!(err.to_string().contains("missing .end method"));
    }

    #[test]
    fn directive_before_class_is_an_error() {
        let bad = ".super Ljava/lang/Object;\n";
        assert!(parse_class(bad, "B.smali").is_err());
    }
}

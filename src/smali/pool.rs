use crate::smali::errors::SmaliError;
use crate::smali::insn::Instruction;
use std::fmt;
use std::path::PathBuf;

/// Index handle to one method inside a [`ClassPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    pub class: usize,
    pub method: usize,
}

/// Parsed JVM-style method descriptor: `(Ljava/lang/String;I)Z`.
///
/// The descriptor is fixed for the lifetime of a rewrite pass; the rewriter
/// only ever touches instruction content and register counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    raw: String,
    pub params: Vec<String>,
    pub ret: String,
}

/// What a descriptor-consistent return looks like for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    /// 32-bit primitive (`Z`, `B`, `S`, `C`, `I`, `F`) -- `return vX`.
    Single,
    /// 64-bit primitive (`J`, `D`) -- `return-wide vX`.
    Wide,
    /// Reference or array type -- `return-object vX`.
    Object,
}

impl ReturnKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ReturnKind::Void => "return-void",
            ReturnKind::Single => "return",
            ReturnKind::Wide => "return-wide",
            ReturnKind::Object => "return-object",
        }
    }
}

impl MethodDescriptor {
    pub fn parse(raw: &str) -> Result<Self, SmaliError> {
        let inner = raw
            .strip_prefix('(')
            .and_then(|r| r.split_once(')'))
            .ok_or_else(|| SmaliError::BadDescriptor(raw.to_string()))?;
        let (param_str, ret) = inner;
        if ret.is_empty() {
            return Err(SmaliError::BadDescriptor(raw.to_string()));
        }

        let mut params = Vec::new();
        let mut chars = param_str.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            let end = match c {
                'Z' | 'B' | 'S' | 'C' | 'I' | 'J' | 'F' | 'D' => start + 1,
                '[' => {
                    // Consume array dimensions, then one element type.
                    let mut last = start;
                    while let Some(&(i, '[')) = chars.peek() {
                        last = i;
                        chars.next();
                    }
                    match chars.next() {
                        Some((_, 'L')) => {
                            let mut close = None;
                            for (j, d) in chars.by_ref() {
                                if d == ';' {
                                    close = Some(j);
                                    break;
                                }
                            }
                            close.ok_or_else(|| SmaliError::BadDescriptor(raw.to_string()))? + 1
                        }
                        Some((i, d)) if "ZBSCIJFD".contains(d) => i + 1,
                        _ => return Err(SmaliError::BadDescriptor(raw.to_string())),
                    }
                    .max(last + 1)
                }
                'L' => {
                    let mut close = None;
                    for (j, d) in chars.by_ref() {
                        if d == ';' {
                            close = Some(j);
                            break;
                        }
                    }
                    close.ok_or_else(|| SmaliError::BadDescriptor(raw.to_string()))? + 1
                }
                _ => return Err(SmaliError::BadDescriptor(raw.to_string())),
            };
            params.push(param_str[start..end].to_string());
        }

        Ok(MethodDescriptor {
            raw: raw.to_string(),
            params,
            ret: ret.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn return_kind(&self) -> ReturnKind {
        match self.ret.chars().next() {
            Some('V') => ReturnKind::Void,
            Some('J') | Some('D') => ReturnKind::Wide,
            Some('L') | Some('[') => ReturnKind::Object,
            _ => ReturnKind::Single,
        }
    }

    /// Register words consumed by the parameters (wide types take two).
    pub fn param_words(&self) -> u16 {
        self.params
            .iter()
            .map(|p| match p.as_str() {
                "J" | "D" => 2,
                _ => 1,
            })
            .sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// How the method declared its register budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSpec {
    /// `.locals n` -- registers beyond the parameters.
    Locals(u16),
    /// `.registers n` -- total including parameters.
    Registers(u16),
}

impl RegisterSpec {
    pub fn directive(self) -> String {
        match self {
            RegisterSpec::Locals(n) => format!(".locals {n}"),
            RegisterSpec::Registers(n) => format!(".registers {n}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: MethodDescriptor,
    /// Access flag words exactly as written (`public`, `final`, ...).
    pub access: Vec<String>,
    pub registers: RegisterSpec,
    pub instructions: Vec<Instruction>,
    /// Labels at the very end of the body with no following instruction.
    pub trailing_labels: Vec<String>,
}

impl MethodDef {
    /// All labels referenced by branch operands anywhere in the body.
    pub fn referenced_labels(&self) -> impl Iterator<Item = &str> {
        self.instructions.iter().flat_map(|i| i.branch_targets())
    }

    /// Raise the register budget so at least `locals` non-parameter
    /// registers exist. Never lowers it.
    pub fn ensure_locals(&mut self, locals: u16) {
        match self.registers {
            RegisterSpec::Locals(n) if n < locals => {
                self.registers = RegisterSpec::Locals(locals);
            }
            RegisterSpec::Registers(n) => {
                let needed = locals + self.descriptor.param_words();
                if n < needed {
                    self.registers = RegisterSpec::Registers(needed);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Internal type descriptor: `Lcom/foo/Bar;`.
    pub descriptor: String,
    pub access: Vec<String>,
    pub super_descriptor: Option<String>,
    pub interfaces: Vec<String>,
    pub source: Option<String>,
    /// Non-method lines (fields, annotations) kept verbatim for round-trip.
    pub preamble: Vec<String>,
    pub methods: Vec<MethodDef>,
    /// Where this class was parsed from; `None` for synthetic pools.
    pub path: Option<PathBuf>,
    /// Set by the rewriter; only dirty classes are serialized back.
    pub dirty: bool,
}

impl ClassDef {
    /// Simple name: the segment after the last `/`, without `L`-prefix and
    /// trailing `;`. `Lcom/foo/Bar;` -> `Bar`.
    pub fn simple_name(&self) -> &str {
        let inner = self
            .descriptor
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(&self.descriptor);
        inner.rsplit('/').next().unwrap_or(inner)
    }

    /// True if the class declares it implements `interface_descriptor`.
    pub fn implements(&self, interface_descriptor: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface_descriptor)
    }
}

/// Arena over every class parsed from the artifact. Immutable during
/// matching; mutated only through [`ClassPool::method_mut`] by the rewriter.
#[derive(Debug, Default)]
pub struct ClassPool {
    classes: Vec<ClassDef>,
}

impl ClassPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class: ClassDef) -> usize {
        self.classes.push(class);
        self.classes.len() - 1
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn class(&self, idx: usize) -> &ClassDef {
        &self.classes[idx]
    }

    pub fn method(&self, r: MethodRef) -> &MethodDef {
        &self.classes[r.class].methods[r.method]
    }

    /// Mutable access for the rewriter. The caller marks the owning class
    /// dirty only when a rewrite actually changed the body.
    pub fn method_mut(&mut self, r: MethodRef) -> &mut MethodDef {
        &mut self.classes[r.class].methods[r.method]
    }

    pub fn mark_dirty(&mut self, class_idx: usize) {
        self.classes[class_idx].dirty = true;
    }

    pub fn clear_dirty(&mut self, class_idx: usize) {
        self.classes[class_idx].dirty = false;
    }

    pub fn dirty_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter().filter(|c| c.dirty)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Human-readable identity for error context:
    /// `Lcom/foo/Bar;->verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z`.
    pub fn describe(&self, r: MethodRef) -> String {
        let class = &self.classes[r.class];
        let method = &class.methods[r.method];
        format!(
            "{}->{}{}",
            class.descriptor,
            method.name,
            method.descriptor.as_str()
        )
    }
}

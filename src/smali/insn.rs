use std::fmt;

/// One smali body line: an instruction or a dot-directive, with any labels
/// that named its address.
///
/// Directives (`.line`, `.catch`, ...) are kept in sequence with the same
/// representation so bodies round-trip; their mnemonics start with `.` and
/// therefore never collide with instruction patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Labels attached to this instruction's address, without the leading `:`.
    pub labels: Vec<String>,
    pub mnemonic: String,
    pub operands: Vec<String>,
}

impl Instruction {
    /// Parse a single body line (no label prefix, already trimmed).
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => Instruction {
                labels: Vec::new(),
                mnemonic: mnemonic.to_string(),
                operands: split_operands(rest),
            },
            None => Instruction {
                labels: Vec::new(),
                mnemonic: line.to_string(),
                operands: Vec::new(),
            },
        }
    }

    pub fn new(mnemonic: impl Into<String>, operands: &[&str]) -> Self {
        Instruction {
            labels: Vec::new(),
            mnemonic: mnemonic.into(),
            operands: operands.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// True for the value-carrying return family (`return`, `return-wide`,
    /// `return-object`), false for `return-void` and everything else.
    pub fn is_value_return(&self) -> bool {
        matches!(self.mnemonic.as_str(), "return" | "return-wide" | "return-object")
    }

    pub fn is_return(&self) -> bool {
        self.mnemonic == "return-void" || self.is_value_return()
    }

    pub fn is_directive(&self) -> bool {
        self.mnemonic.starts_with('.')
    }

    /// Labels this instruction branches to (operands written as `:label`).
    pub fn branch_targets(&self) -> impl Iterator<Item = &str> {
        self.operands
            .iter()
            .filter_map(|op| op.strip_prefix(':'))
    }

    /// Load an integer constant into `reg`, picking the narrowest encodable
    /// form. `const/4` only reaches v0..v15 with a 4-bit literal.
    pub fn const_into(reg: &str, value: i32) -> Self {
        let narrow = (-8..=7).contains(&value)
            && reg
                .strip_prefix('v')
                .and_then(|n| n.parse::<u16>().ok())
                .is_some_and(|n| n < 16);
        let mnemonic = if narrow {
            "const/4"
        } else if i16::try_from(value).is_ok() {
            "const/16"
        } else {
            "const"
        };
        let literal = if value < 0 {
            format!("-{:#x}", value.unsigned_abs())
        } else {
            format!("{value:#x}")
        };
        Instruction::new(mnemonic, &[reg, &literal])
    }

    /// Structural equality ignoring labels. Used for sentinel detection:
    /// an injected block is "already present" when the instructions match
    /// regardless of what labels ended up attached to them.
    pub fn same_op(&self, other: &Instruction) -> bool {
        self.mnemonic == other.mnemonic && self.operands == other.operands
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

/// Split an operand list on commas outside string literals and register
/// lists: `const-string v0, "a,b"` is two operands, and `{v1, v2}` is one.
fn split_operands(rest: &str) -> Vec<String> {
    let mut operands = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut brace_depth = 0usize;

    for c in rest.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_string = !in_string;
            }
            '{' if !in_string => {
                current.push(c);
                brace_depth += 1;
            }
            '}' if !in_string => {
                current.push(c);
                brace_depth = brace_depth.saturating_sub(1);
            }
            ',' if !in_string && brace_depth == 0 => {
                operands.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        operands.push(current.trim().to_string());
    }
    operands
}

/// A structural pattern over one instruction.
///
/// Written with the same syntax as an instruction line. A trailing `*` on the
/// mnemonic makes it a prefix match (`return*` covers the whole return
/// family); an operand of `*` matches anything; omitted trailing operands are
/// don't-care.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsnPattern {
    pub mnemonic: String,
    pub operands: Vec<String>,
}

impl InsnPattern {
    pub fn parse(spec: &str) -> Self {
        let insn = Instruction::parse(spec);
        InsnPattern {
            mnemonic: insn.mnemonic,
            operands: insn.operands,
        }
    }

    pub fn mnemonic(spec: &str) -> Self {
        InsnPattern {
            mnemonic: spec.to_string(),
            operands: Vec::new(),
        }
    }

    pub fn matches(&self, insn: &Instruction) -> bool {
        let mnemonic_ok = match self.mnemonic.strip_suffix('*') {
            Some(prefix) => insn.mnemonic.starts_with(prefix),
            None => insn.mnemonic == self.mnemonic,
        };
        if !mnemonic_ok {
            return false;
        }
        if self.operands.len() > insn.operands.len() {
            return false;
        }
        self.operands
            .iter()
            .zip(&insn.operands)
            .all(|(want, have)| want == "*" || want == have)
    }
}

impl fmt::Display for InsnPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_instruction() {
        let insn = Instruction::parse("const/4 v0, 0x1");
        assert_eq!(insn.mnemonic, "const/4");
        assert_eq!(insn.operands, vec!["v0", "0x1"]);
    }

    #[test]
    fn parse_no_operands() {
        let insn = Instruction::parse("return-void");
        assert_eq!(insn.mnemonic, "return-void");
        assert!(insn.operands.is_empty());
    }

    #[test]
    fn register_list_is_one_operand() {
        let insn = Instruction::parse("invoke-direct {p0, p1}, Ljava/lang/Object;-><init>()V");
        assert_eq!(
            insn.operands,
            vec!["{p0, p1}", "Ljava/lang/Object;-><init>()V"]
        );
    }

    #[test]
    fn parse_string_operand_with_comma() {
        let insn = Instruction::parse(r#"const-string v1, "a,b""#);
        assert_eq!(insn.operands, vec!["v1", r#""a,b""#]);
    }

    #[test]
    fn display_round_trip() {
        for line in [
            "invoke-virtual {p0, p1}, Lcom/foo/Bar;->baz(I)V",
            "return v0",
            "if-eqz v0, :cond_0",
        ] {
            assert_eq!(Instruction::parse(line).to_string(), line);
        }
    }

    #[test]
    fn branch_targets_extracted() {
        let insn = Instruction::parse("if-eqz v0, :cond_0");
        let targets: Vec<_> = insn.branch_targets().collect();
        assert_eq!(targets, vec!["cond_0"]);
    }

    #[test]
    fn const_into_narrow_and_wide_registers() {
        assert_eq!(Instruction::const_into("v0", 1).to_string(), "const/4 v0, 0x1");
        assert_eq!(
            Instruction::const_into("v16", 1).to_string(),
            "const/16 v16, 0x1"
        );
        assert_eq!(
            Instruction::const_into("v0", 100).to_string(),
            "const/16 v0, 0x64"
        );
        assert_eq!(
            Instruction::const_into("v0", -1).to_string(),
            "const/4 v0, -0x1"
        );
        assert_eq!(
            Instruction::const_into("v0", 0x12345).to_string(),
            "const v0, 0x12345"
        );
    }

    #[test]
    fn pattern_exact_and_prefix() {
        let ret = Instruction::parse("return v0");
        assert!(InsnPattern::parse("return v0").matches(&ret));
        assert!(InsnPattern::parse("return*").matches(&ret));
        assert!(InsnPattern::parse("return").matches(&ret));
        assert!(!InsnPattern::parse("return-void").matches(&ret));
        assert!(!InsnPattern::parse("return v1").matches(&ret));
    }

    #[test]
    fn pattern_wildcard_operand() {
        let invoke = Instruction::parse("invoke-interface {v1, v2}, Ljavax/net/ssl/HostnameVerifier;->verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z");
        let pat = InsnPattern::parse(
            "invoke-interface *, Ljavax/net/ssl/HostnameVerifier;->verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z",
        );
        assert!(pat.matches(&invoke));
    }

    #[test]
    fn directive_never_matches_instruction_pattern() {
        let directive = Instruction::parse(".line 42");
        assert!(directive.is_directive());
        assert!(!InsnPattern::mnemonic("line").matches(&directive));
    }
}

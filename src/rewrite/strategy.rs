use crate::rewrite::errors::RewriteError;
use crate::smali::{InsnPattern, Instruction, MethodDef, MethodDescriptor, RegisterSpec, ReturnKind};

/// A 32-bit constant forced into a return register.
///
/// Wide and reference returns would need value synthesis beyond a single
/// `const`, so they are rejected at rewrite time rather than miscompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnConstant {
    True,
    False,
    Int(i32),
}

impl ReturnConstant {
    pub fn value(self) -> i32 {
        match self {
            ReturnConstant::True => 1,
            ReturnConstant::False => 0,
            ReturnConstant::Int(v) => v,
        }
    }
}

/// How a matched method body is transformed. Declarative; applied exactly
/// once per matched method per build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RewriteStrategy {
    /// Replace the entire body with a fixed sequence ending in a return.
    ReplaceBody {
        registers: u16,
        instructions: Vec<Instruction>,
    },
    /// Insert a block immediately before the first instruction matching the
    /// marker, leaving prior control-flow targets undisturbed.
    InjectBefore {
        marker: InsnPattern,
        block: Vec<Instruction>,
    },
    /// Load a constant into the returned register before every return site,
    /// so the method returns the constant on every path.
    ForceReturn { constant: ReturnConstant },
}

impl RewriteStrategy {
    /// Stub body returning the descriptor's zero value (`false`, `0`,
    /// `null`), or plain `return-void`.
    pub fn return_stub(descriptor: &MethodDescriptor) -> RewriteStrategy {
        let (registers, instructions) = match descriptor.return_kind() {
            ReturnKind::Void => (0, vec![Instruction::new("return-void", &[])]),
            ReturnKind::Single => (
                1,
                vec![
                    Instruction::const_into("v0", 0),
                    Instruction::new("return", &["v0"]),
                ],
            ),
            ReturnKind::Wide => (
                2,
                vec![
                    Instruction::new("const-wide/16", &["v0", "0x0"]),
                    Instruction::new("return-wide", &["v0"]),
                ],
            ),
            ReturnKind::Object => (
                1,
                vec![
                    Instruction::const_into("v0", 0),
                    Instruction::new("return-object", &["v0"]),
                ],
            ),
        };
        RewriteStrategy::ReplaceBody {
            registers,
            instructions,
        }
    }

    pub fn force_true() -> RewriteStrategy {
        RewriteStrategy::ForceReturn {
            constant: ReturnConstant::True,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RewriteStrategy::ReplaceBody { instructions, .. } => {
                format!("replace-body ({} instructions)", instructions.len())
            }
            RewriteStrategy::InjectBefore { marker, .. } => format!("inject-before [{marker}]"),
            RewriteStrategy::ForceReturn { constant } => {
                format!("force-return {:#x}", constant.value())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "RewriteOutcome decides whether the owning class is dirty"]
pub enum RewriteOutcome {
    Applied,
    AlreadyApplied,
}

/// Apply `strategy` to `method` in place.
///
/// The descriptor is never altered. On `Applied` the caller is responsible
/// for marking the owning class dirty; `AlreadyApplied` guarantees the body
/// is untouched.
pub fn rewrite(
    method: &mut MethodDef,
    strategy: &RewriteStrategy,
) -> Result<RewriteOutcome, RewriteError> {
    match strategy {
        RewriteStrategy::ReplaceBody {
            registers,
            instructions,
        } => replace_body(method, *registers, instructions),
        RewriteStrategy::InjectBefore { marker, block } => inject_before(method, marker, block),
        RewriteStrategy::ForceReturn { constant } => force_return(method, *constant),
    }
}

fn replace_body(
    method: &mut MethodDef,
    registers: u16,
    instructions: &[Instruction],
) -> Result<RewriteOutcome, RewriteError> {
    let last = instructions.last().ok_or_else(|| RewriteError::InvalidStrategy {
        reason: "replacement body is empty".to_string(),
    })?;

    let wanted = method.descriptor.return_kind().mnemonic();
    if last.mnemonic != wanted {
        return Err(RewriteError::MismatchedReturn {
            descriptor: method.descriptor.as_str().to_string(),
        });
    }
    // Any early return inside the sequence must agree with the descriptor too.
    if instructions
        .iter()
        .any(|i| i.is_return() && i.mnemonic != wanted)
    {
        return Err(RewriteError::MismatchedReturn {
            descriptor: method.descriptor.as_str().to_string(),
        });
    }

    // Sentinel: the body already is the replacement (labels ignored).
    if method.instructions.len() == instructions.len()
        && method
            .instructions
            .iter()
            .zip(instructions)
            .all(|(a, b)| a.same_op(b))
    {
        return Ok(RewriteOutcome::AlreadyApplied);
    }

    method.instructions = instructions.to_vec();
    method.trailing_labels.clear();
    method.registers = RegisterSpec::Locals(registers);
    Ok(RewriteOutcome::Applied)
}

fn inject_before(
    method: &mut MethodDef,
    marker: &InsnPattern,
    block: &[Instruction],
) -> Result<RewriteOutcome, RewriteError> {
    if block.is_empty() {
        return Err(RewriteError::InvalidStrategy {
            reason: "injection block is empty".to_string(),
        });
    }
    if block.iter().any(|i| !i.labels.is_empty()) {
        return Err(RewriteError::InvalidStrategy {
            reason: "injection block must not carry labels".to_string(),
        });
    }

    let at = method
        .instructions
        .iter()
        .position(|i| marker.matches(i))
        .ok_or_else(|| RewriteError::MarkerNotFound {
            marker: marker.to_string(),
        })?;

    // Sentinel: block already sits immediately before the marker.
    if at >= block.len()
        && method.instructions[at - block.len()..at]
            .iter()
            .zip(block)
            .all(|(a, b)| a.same_op(b))
    {
        return Ok(RewriteOutcome::AlreadyApplied);
    }

    // Injecting before a branch target would leave the block skipped on
    // branched-in paths; refuse rather than silently half-patch.
    let referenced: Vec<String> = method
        .referenced_labels()
        .map(|l| l.to_string())
        .collect();
    if let Some(label) = method.instructions[at]
        .labels
        .iter()
        .find(|l| referenced.iter().any(|r| r == *l))
    {
        return Err(RewriteError::UnsafeInjectionSite {
            label: label.clone(),
        });
    }

    // The block may use local registers the method never declared.
    let block_locals = block
        .iter()
        .flat_map(|i| i.operands.iter())
        .filter_map(|op| op.strip_prefix('v').and_then(|n| n.parse::<u16>().ok()))
        .map(|n| n + 1)
        .max();
    if let Some(needed) = block_locals {
        method.ensure_locals(needed);
    }

    let tail = method.instructions.split_off(at);
    method.instructions.extend(block.iter().cloned());
    method.instructions.extend(tail);
    Ok(RewriteOutcome::Applied)
}

fn force_return(
    method: &mut MethodDef,
    constant: ReturnConstant,
) -> Result<RewriteOutcome, RewriteError> {
    if method.descriptor.return_kind() != ReturnKind::Single {
        return Err(RewriteError::MismatchedReturn {
            descriptor: method.descriptor.as_str().to_string(),
        });
    }

    let return_sites: Vec<usize> = method
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, i)| i.is_value_return())
        .map(|(idx, _)| idx)
        .collect();
    if return_sites.is_empty() {
        return Err(RewriteError::MarkerNotFound {
            marker: "return*".to_string(),
        });
    }

    // Back-to-front so earlier indices stay valid across insertions.
    let mut touched = false;
    for idx in return_sites.into_iter().rev() {
        let reg = method.instructions[idx]
            .operands
            .first()
            .cloned()
            .ok_or_else(|| RewriteError::InvalidStrategy {
                reason: "return site carries no register operand".to_string(),
            })?;
        let load = Instruction::const_into(&reg, constant.value());

        let already = idx > 0 && method.instructions[idx - 1].same_op(&load);
        if already {
            continue;
        }

        // Branches into the return site must pass through the load too, so
        // the site's labels move onto the inserted instruction.
        let mut load = load;
        load.labels = std::mem::take(&mut method.instructions[idx].labels);
        method.instructions.insert(idx, load);
        touched = true;
    }

    Ok(if touched {
        RewriteOutcome::Applied
    } else {
        RewriteOutcome::AlreadyApplied
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smali::parse_class;
    use crate::smali::pool::MethodDef;
    use proptest::prelude::*;

    fn method_from(body: &str, signature: &str) -> MethodDef {
        let src = format!(
            ".class public Lt/T;\n.super Ljava/lang/Object;\n\n.method public {signature}\n{body}.end method\n"
        );
        parse_class(&src, "T.smali").unwrap().methods.remove(0)
    }

    fn verify_method() -> MethodDef {
        method_from(
            "    .locals 1\n\n    const/4 v0, 0x0\n\n    if-eqz p1, :cond_0\n\n    return v0\n\n    :cond_0\n    const/4 v0, 0x0\n\n    return v0\n",
            "verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z",
        )
    }

    #[test]
    fn force_return_true_covers_every_path() {
        let mut m = verify_method();
        let descriptor_before = m.descriptor.clone();

        let outcome = rewrite(&mut m, &RewriteStrategy::force_true()).unwrap();
        assert_eq!(outcome, RewriteOutcome::Applied);
        assert_eq!(m.descriptor, descriptor_before);

        // Every return is now immediately preceded by const true into the
        // returned register, and branch labels moved onto the load.
        let sites: Vec<usize> = m
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, i)| i.is_value_return())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(sites.len(), 2);
        for idx in sites {
            let load = &m.instructions[idx - 1];
            assert_eq!(load.mnemonic, "const/4");
            assert_eq!(load.operands, vec!["v0", "0x1"]);
            assert!(m.instructions[idx].labels.is_empty());
        }
        assert!(m
            .instructions
            .iter()
            .any(|i| i.labels.contains(&"cond_0".to_string()) && i.mnemonic == "const/4"));
    }

    #[test]
    fn force_return_is_idempotent() {
        let mut m = verify_method();
        rewrite(&mut m, &RewriteStrategy::force_true()).unwrap();
        let once = m.instructions.clone();

        let outcome = rewrite(&mut m, &RewriteStrategy::force_true()).unwrap();
        assert_eq!(outcome, RewriteOutcome::AlreadyApplied);
        assert_eq!(m.instructions, once);
    }

    #[test]
    fn force_return_rejects_void_and_wide() {
        let mut void_m = method_from("    .locals 0\n\n    return-void\n", "close()V");
        assert!(matches!(
            rewrite(&mut void_m, &RewriteStrategy::force_true()),
            Err(RewriteError::MismatchedReturn { .. })
        ));

        let mut wide_m = method_from(
            "    .locals 2\n\n    const-wide/16 v0, 0x0\n\n    return-wide v0\n",
            "nanos()J",
        );
        assert!(matches!(
            rewrite(&mut wide_m, &RewriteStrategy::force_true()),
            Err(RewriteError::MismatchedReturn { .. })
        ));
    }

    #[test]
    fn replace_body_stub_matches_descriptor() {
        let mut m = method_from(
            "    .locals 3\n\n    invoke-virtual {p0}, Lt/T;->boom()V\n\n    return-void\n",
            "checkServerTrusted([Ljava/security/cert/X509Certificate;Ljava/lang/String;)V",
        );
        let stub = RewriteStrategy::return_stub(&m.descriptor);
        let outcome = rewrite(&mut m, &stub).unwrap();
        assert_eq!(outcome, RewriteOutcome::Applied);
        assert_eq!(m.instructions.len(), 1);
        assert_eq!(m.instructions[0].mnemonic, "return-void");
        assert_eq!(m.registers, RegisterSpec::Locals(0));

        let outcome = rewrite(&mut m, &stub).unwrap();
        assert_eq!(outcome, RewriteOutcome::AlreadyApplied);
    }

    #[test]
    fn replace_body_rejects_wrong_terminator() {
        let mut m = verify_method();
        let strategy = RewriteStrategy::ReplaceBody {
            registers: 0,
            instructions: vec![Instruction::new("return-void", &[])],
        };
        assert!(matches!(
            rewrite(&mut m, &strategy),
            Err(RewriteError::MismatchedReturn { .. })
        ));
    }

    #[test]
    fn inject_before_first_marker_only() {
        let mut m = verify_method();
        let strategy = RewriteStrategy::InjectBefore {
            marker: InsnPattern::parse("return v0"),
            block: vec![Instruction::parse("sget-object v0, Lt/Log;->OK:Lt/Log;")],
        };
        let outcome = rewrite(&mut m, &strategy).unwrap();
        assert_eq!(outcome, RewriteOutcome::Applied);

        let first_ret = m
            .instructions
            .iter()
            .position(|i| i.is_value_return())
            .unwrap();
        assert_eq!(m.instructions[first_ret - 1].mnemonic, "sget-object");

        // Second run detects the sentinel block and leaves the body alone.
        let body = m.instructions.clone();
        assert_eq!(
            rewrite(&mut m, &strategy).unwrap(),
            RewriteOutcome::AlreadyApplied
        );
        assert_eq!(m.instructions, body);
    }

    #[test]
    fn inject_before_branch_target_is_unsafe() {
        let mut m = verify_method();
        // The second return's preceding const carries :cond_0; target the
        // labeled instruction directly.
        let strategy = RewriteStrategy::InjectBefore {
            marker: InsnPattern::parse("const/4 v0, 0x0"),
            block: vec![Instruction::parse("nop")],
        };
        // First const/4 v0, 0x0 is unlabeled, so this succeeds; retarget the
        // labeled one by injecting after the first was rewritten.
        rewrite(&mut m, &strategy).unwrap();

        let mut labeled = verify_method();
        labeled.instructions.retain(|i| {
            !(i.mnemonic == "const/4" && i.labels.is_empty())
        });
        let err = rewrite(&mut labeled, &strategy).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::UnsafeInjectionSite { ref label } if label == "cond_0"
        ));
    }

    #[test]
    fn labeled_block_is_rejected() {
        let mut m = verify_method();
        let mut insn = Instruction::parse("nop");
        insn.labels.push("mine".to_string());
        let strategy = RewriteStrategy::InjectBefore {
            marker: InsnPattern::parse("return*"),
            block: vec![insn],
        };
        assert!(matches!(
            rewrite(&mut m, &strategy),
            Err(RewriteError::InvalidStrategy { .. })
        ));
    }

    proptest! {
        /// Applying force-return twice never differs from applying it once.
        #[test]
        fn force_return_twice_equals_once(returns in 1usize..4, value in -8i32..8) {
            let mut body = String::from("    .locals 1\n");
            for i in 0..returns {
                body.push_str(&format!("    const/4 v0, {:#x}\n", i % 2));
                body.push_str("    return v0\n");
            }
            let mut m = method_from(&body, "flag()Z");
            let strategy = RewriteStrategy::ForceReturn {
                constant: ReturnConstant::Int(value),
            };

            rewrite(&mut m, &strategy).unwrap();
            let once = m.instructions.clone();
            let outcome = rewrite(&mut m, &strategy).unwrap();
            prop_assert_eq!(outcome, RewriteOutcome::AlreadyApplied);
            prop_assert_eq!(m.instructions, once);
        }
    }
}

//! Parameter and Constant Substitution
//!
//! Binds a call's actual arguments to the callee's formal parameters. Each
//! formal gets a `StubSource`: the caller value flowing into it, a constant
//! actual, or the default of an omitted optional parameter. Constants are
//! seeded into the callee before it is optimized so they can fold; the
//! remaining stubs are resolved to caller values when the body is spliced.

use super::error::BailoutReason;
use crate::ir::{BoundArgument, CallInfo, FunctionInfo, IrFunction, IrId, IrInstruction, IrValue};
use log::trace;

/// What flows into one formal parameter
#[derive(Debug, Clone, PartialEq)]
pub enum StubSource {
    /// A non-constant caller value
    Actual(IrId),
    /// A constant actual argument
    Constant(IrValue),
    /// Default value of an optional parameter the call omitted
    Default(IrValue),
}

impl StubSource {
    pub fn constant(&self) -> Option<&IrValue> {
        match self {
            StubSource::Actual(_) => None,
            StubSource::Constant(value) | StubSource::Default(value) => Some(value),
        }
    }
}

fn source_of(caller: &IrFunction, value: IrId) -> StubSource {
    match caller.constant_value(value) {
        Some(constant) => StubSource::Constant(constant.clone()),
        None => StubSource::Actual(value),
    }
}

/// One source per callee parameter index: the type-argument vector first for
/// generic callees, then every formal in declaration order.
///
/// A call shape the signature cannot accept marks the callee never-inline.
pub fn bind_actuals(
    caller: &IrFunction,
    info: &FunctionInfo,
    call: &CallInfo,
) -> Result<Vec<StubSource>, BailoutReason> {
    let bound = info
        .signature
        .bind_arguments(call.args.len(), &call.arg_names)
        .map_err(|mismatch| {
            info.stats.mark_not_inlinable();
            BailoutReason::OptionalArgumentMismatch(mismatch.to_string())
        })?;

    let mut sources = Vec::with_capacity(bound.len() + 1);
    if info.signature.is_generic {
        sources.push(match call.type_args {
            Some(type_args) => source_of(caller, type_args),
            None => StubSource::Constant(IrValue::Null),
        });
    }
    for binding in bound {
        sources.push(match binding {
            BoundArgument::Actual(i) => {
                let actual = call.args.get(i).ok_or_else(|| {
                    BailoutReason::OptionalArgumentMismatch(format!(
                        "argument {} missing from a call with {} arguments",
                        i,
                        call.args.len()
                    ))
                })?;
                source_of(caller, *actual)
            }
            BoundArgument::Default(value) => StubSource::Default(value),
        });
    }
    Ok(sources)
}

/// Constant actual arguments (defaults do not count)
pub fn constant_actual_count(sources: &[StubSource]) -> u32 {
    sources
        .iter()
        .filter(|s| matches!(s, StubSource::Constant(_)))
        .count() as u32
}

/// Replace parameters fed by constants with constants of the callee's pool.
/// Returns the number of parameters replaced.
pub fn seed_constants(callee: &mut IrFunction, sources: &[StubSource]) -> usize {
    let seeded: Vec<(IrId, IrValue)> = callee
        .parameters()
        .into_iter()
        .filter_map(|(index, dest)| {
            let value = sources.get(index as usize)?.constant()?;
            Some((dest, value.clone()))
        })
        .collect();

    for (param, value) in &seeded {
        let pooled = callee.get_or_insert_constant(value.clone());
        callee.replace_all_uses(*param, pooled);
        let entry = callee.entry_block();
        if let Some(block) = callee.cfg.get_block_mut(entry) {
            block
                .instructions
                .retain(|inst| !matches!(inst, IrInstruction::Parameter { dest, .. } if dest == param));
        }
        trace!("{}: parameter {} seeded with {}", callee.name, param, value);
    }
    seeded.len()
}

/// Check that every parameter left in the callee has a source
pub fn check_stubs(callee: &IrFunction, sources: &[StubSource]) -> Result<(), BailoutReason> {
    let entry = callee.entry_block();
    for block in callee.cfg.blocks.values() {
        for inst in &block.instructions {
            if let IrInstruction::Parameter { index, .. } = inst {
                if block.id != entry || *index as usize >= sources.len() {
                    return Err(BailoutReason::ParseOrCompileError(format!(
                        "unresolved parameter stub {} in {}",
                        index, callee.name
                    )));
                }
            }
        }
    }
    Ok(())
}

//! Textual dump of a [`FlowFunction`], for tracing output and test failures.

use std::fmt;

use super::{Callee, FlowFunction, FlowInstr, FlowTerminator, FuncId, TypeInfoId, ValueId};

impl FlowFunction {
    fn func_name(&self, func: FuncId) -> &str {
        self.functions
            .get(func.index())
            .map_or("<unknown>", |decl| decl.name.as_str())
    }

    fn type_info_name(&self, ti: TypeInfoId) -> &str {
        self.type_infos
            .get(ti.index())
            .map_or("<unknown>", String::as_str)
    }

    fn fmt_callee(&self, f: &mut fmt::Formatter<'_>, callee: Callee, args: &[ValueId]) -> fmt::Result {
        match callee {
            Callee::Direct(func) => write!(f, "@{}(", self.func_name(func))?,
            Callee::Indirect(ptr) => write!(f, "%{}(", ptr.raw())?,
        }
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{}", arg.raw())?;
        }
        write!(f, ")")
    }

    fn fmt_instr(&self, f: &mut fmt::Formatter<'_>, instr: &FlowInstr) -> fmt::Result {
        match instr {
            FlowInstr::Alloca { slot } => {
                let name = self.slots.get(slot.index()).map_or("", String::as_str);
                write!(f, "${} = alloca \"{name}\"", slot.raw())
            }
            FlowInstr::AllocaPoint => write!(f, "<alloca point>"),
            FlowInstr::Load { dst, slot } => write!(f, "%{} = load ${}", dst.raw(), slot.raw()),
            FlowInstr::Store { value, slot } => {
                write!(f, "store %{} -> ${}", value.raw(), slot.raw())
            }
            FlowInstr::StoreConst { value, slot } => {
                write!(f, "store {value} -> ${}", slot.raw())
            }
            FlowInstr::Call {
                dst, callee, args, ..
            } => {
                write!(f, "%{} = call ", dst.raw())?;
                self.fmt_callee(f, *callee, args)
            }
            FlowInstr::LandingPad {
                exception,
                selector,
                cleanup,
                clauses,
            } => {
                write!(
                    f,
                    "%{}, %{} = landingpad",
                    exception.raw(),
                    selector.raw()
                )?;
                if *cleanup {
                    write!(f, " cleanup")?;
                }
                for clause in clauses {
                    write!(f, " catch {}", self.type_info_name(*clause))?;
                }
                Ok(())
            }
            FlowInstr::TypeIdFor { dst, type_info } => write!(
                f,
                "%{} = typeid.for {}",
                dst.raw(),
                self.type_info_name(*type_info)
            ),
            FlowInstr::CmpEq { dst, lhs, rhs } => {
                write!(f, "%{} = eq %{}, %{}", dst.raw(), lhs.raw(), rhs.raw())
            }
        }
    }

    fn fmt_terminator(&self, f: &mut fmt::Formatter<'_>, term: &FlowTerminator) -> fmt::Result {
        match term {
            FlowTerminator::Jump { target } => write!(f, "br bb{}", target.raw()),
            FlowTerminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(
                f,
                "br %{}, bb{}, bb{}",
                cond.raw(),
                then_block.raw(),
                else_block.raw()
            ),
            FlowTerminator::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch %{}, default bb{} [", value.raw(), default.raw())?;
                for (i, (case, target)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{case} => bb{}", target.raw())?;
                }
                write!(f, "]")
            }
            FlowTerminator::Invoke {
                dst,
                callee,
                args,
                normal,
                unwind,
                ..
            } => {
                write!(f, "%{} = invoke ", dst.raw())?;
                self.fmt_callee(f, *callee, args)?;
                write!(f, " to bb{} unwind bb{}", normal.raw(), unwind.raw())
            }
            FlowTerminator::Return { value: Some(v) } => write!(f, "ret %{}", v.raw()),
            FlowTerminator::Return { value: None } => write!(f, "ret"),
            FlowTerminator::Resume { exception } => write!(f, "resume %{}", exception.raw()),
            FlowTerminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for FlowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {} {{", self.name)?;
        for block in &self.blocks {
            writeln!(f, "bb{}: ; {}", block.id.raw(), block.name)?;
            for instr in &block.body {
                write!(f, "    ")?;
                self.fmt_instr(f, instr)?;
                writeln!(f)?;
            }
            write!(f, "    ")?;
            self.fmt_terminator(f, &block.terminator)?;
            writeln!(f)?;
        }
        write!(f, "}}")
    }
}

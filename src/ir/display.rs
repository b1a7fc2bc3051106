//! ============================================================
//!                        IR Printing
//! ============================================================
//! Deterministic textual rendering of a module, for golden tests and
//! the `show_ir` / `show_passes` developer logs. Named values print as
//! `%name`, anonymous values as `%<ordinal>`, and constants inline
//! (`42i`, `7u`, `1.5f`, `true`). Output depends only on module
//! contents, never on arena addresses or hash iteration order.

use crate::ir::function::{BlockId, ShaderStage};
use crate::ir::instructions::{InstId, InstKind, UnaryOp};
use crate::ir::module::Module;
use crate::ir::values::{ConstId, ConstKind, ValueId, ValueKind};
use std::fmt::Write;

pub fn print_module(module: &Module) -> String {
    let mut printer = Printer {
        module,
        out: String::new(),
        indent: 0,
    };
    printer.module();
    printer.out
}

fn stage_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Fragment => "fragment",
        ShaderStage::Compute => "compute",
    }
}

fn value_text(module: &Module, value: ValueId) -> String {
    let data = module.value(value);
    match data.kind {
        ValueKind::Constant(id) => const_text(module, id),
        _ => match data.name {
            Some(name) => format!("%{}", module.symbols.resolve(name)),
            None => format!("%{}", data.ordinal),
        },
    }
}

fn const_text(module: &Module, id: ConstId) -> String {
    match module.const_kind(id) {
        ConstKind::Bool(v) => v.to_string(),
        ConstKind::I32(v) => format!("{v}i"),
        ConstKind::U32(v) => format!("{v}u"),
        ConstKind::F32(bits) => format!("{}f", f32::from_bits(*bits)),
        ConstKind::Splat { ty, value } => format!(
            "{}({} splat)",
            module.types.name_of(*ty, &module.symbols),
            const_text(module, *value)
        ),
        ConstKind::Composite { ty, elements } => {
            let elements = elements
                .iter()
                .map(|&element| const_text(module, element))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({})", module.types.name_of(*ty, &module.symbols), elements)
        }
        ConstKind::Undef(ty) => {
            format!("undef<{}>", module.types.name_of(*ty, &module.symbols))
        }
    }
}

/// `%value:type` pair used for results, parameters and block params.
fn binding_text(module: &Module, value: ValueId) -> String {
    format!(
        "{}:{}",
        value_text(module, value),
        module
            .types
            .name_of(module.value(value).ty, &module.symbols)
    )
}

fn operand_list(module: &Module, inst: InstId, from: usize) -> String {
    module.inst(inst).operands[from..]
        .iter()
        .map(|&operand| value_text(module, operand))
        .collect::<Vec<_>>()
        .join(", ")
}

struct Printer<'m> {
    module: &'m Module,
    out: String,
    indent: usize,
}

impl<'m> Printer<'m> {
    fn module(&mut self) {
        let module = self.module;
        let root = module.block(module.root_block);
        if !root.is_empty() {
            self.line("module {");
            self.indent += 1;
            for &inst in root.insts() {
                self.inst(inst);
            }
            self.indent -= 1;
            self.line("}");
        }

        for function in module.function_ids() {
            let data = module.function(function);
            let mut header = String::new();
            if let Some(stage) = data.stage {
                let _ = write!(header, "@{} ", stage_name(stage));
            }
            let _ = write!(header, "fn {}(", module.symbols.resolve(data.name));
            for (index, &param) in data.params.iter().enumerate() {
                if index > 0 {
                    header.push_str(", ");
                }
                header.push_str(&binding_text(module, param));
            }
            let _ = write!(
                header,
                ") -> {} {{",
                module.types.name_of(data.return_type, &module.symbols)
            );
            self.line(&header);
            self.indent += 1;
            self.block_contents(data.entry);
            self.indent -= 1;
            self.line("}");
        }
    }

    fn block_contents(&mut self, block: BlockId) {
        for &inst in self.module.block(block).insts() {
            self.inst(inst);
        }
    }

    fn nested(&mut self, label: &str, block: BlockId) {
        let module = self.module;
        let data = module.block(block);
        let mut header = String::from(label);
        if !data.params.is_empty() {
            header.push_str(" (");
            for (index, &param) in data.params.iter().enumerate() {
                if index > 0 {
                    header.push_str(", ");
                }
                header.push_str(&binding_text(module, param));
            }
            header.push(')');
        }
        header.push_str(" {");
        self.line(&header);
        self.indent += 1;
        self.block_contents(block);
        self.indent -= 1;
        self.line("}");
    }

    fn inst(&mut self, inst: InstId) {
        let module = self.module;
        let data = module.inst(inst);

        let mut prefix = String::new();
        for (index, &result) in data.results.iter().enumerate() {
            if index > 0 {
                prefix.push_str(", ");
            }
            prefix.push_str(&binding_text(module, result));
        }
        if !prefix.is_empty() {
            prefix.push_str(" = ");
        }

        match &data.kind {
            InstKind::Var(decl) => {
                let mut text = format!("{prefix}var");
                if let Some(point) = decl.binding {
                    let _ = write!(text, " @binding({}, {})", point.group, point.binding);
                }
                if !data.operands.is_empty() {
                    let _ = write!(text, " = {}", operand_list(module, inst, 0));
                }
                self.line(&text);
            }
            InstKind::Let => {
                let text = format!("{prefix}let {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::Load => {
                let text = format!("{prefix}load {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::Store => {
                let text = format!("store {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::LoadVectorElement => {
                let text = format!("{prefix}load_vector_element {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::StoreVectorElement => {
                let text = format!("store_vector_element {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::Access => {
                let text = format!("{prefix}access {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::CoreBinary(op) => {
                let text = format!("{prefix}{} {}", op.mnemonic(), operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::CoreUnary(op) => {
                let name = match op {
                    UnaryOp::Negate => "negate",
                    UnaryOp::Not => "not",
                };
                let text = format!("{prefix}{} {}", name, operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::CoreBuiltinCall(builtin) => {
                let text = format!("{prefix}{}({})", builtin.name(), operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::UserCall(callee) => {
                let name = module.symbols.resolve(module.function(*callee).name);
                let text = format!("{prefix}call {}({})", name, operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::Construct => {
                let text = format!("{prefix}construct {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::Convert => {
                let text = format!("{prefix}convert {}", operand_list(module, inst, 0));
                self.line(&text);
            }
            InstKind::If {
                then_block,
                else_block,
            } => {
                let (then_block, else_block) = (*then_block, *else_block);
                let text = format!("{prefix}if {} {{", operand_list(module, inst, 0));
                self.line(&text);
                self.indent += 1;
                self.nested("then", then_block);
                if let Some(else_block) = else_block {
                    self.nested("else", else_block);
                }
                self.indent -= 1;
                self.line("}");
            }
            InstKind::Loop {
                initializer,
                body,
                continuing,
            } => {
                let (initializer, body, continuing) = (*initializer, *body, *continuing);
                let text = format!("{prefix}loop {{");
                self.line(&text);
                self.indent += 1;
                if let Some(initializer) = initializer {
                    self.nested("initializer", initializer);
                }
                self.nested("body", body);
                if let Some(continuing) = continuing {
                    self.nested("continuing", continuing);
                }
                self.indent -= 1;
                self.line("}");
            }
            InstKind::Switch { cases } => {
                let cases = cases.clone();
                let text = format!("{prefix}switch {} {{", operand_list(module, inst, 0));
                self.line(&text);
                self.indent += 1;
                for case in &cases {
                    let label = if case.is_default {
                        "default".to_string()
                    } else {
                        let selectors = case
                            .selectors
                            .iter()
                            .map(|&selector| const_text(self.module, selector))
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("case {selectors}")
                    };
                    self.nested(&label, case.block);
                }
                self.indent -= 1;
                self.line("}");
            }
            InstKind::Discard => self.line("discard"),
            InstKind::Return => {
                if data.operands.is_empty() {
                    self.line("ret");
                } else {
                    let text = format!("ret {}", operand_list(module, inst, 0));
                    self.line(&text);
                }
            }
            InstKind::Unreachable => self.line("unreachable"),
            InstKind::ExitIf => self.exit("exit_if", inst),
            InstKind::ExitLoop => self.exit("exit_loop", inst),
            InstKind::ExitSwitch => self.exit("exit_switch", inst),
            InstKind::NextIteration => self.exit("next_iteration", inst),
            InstKind::Continue => self.exit("continue", inst),
            InstKind::TerminateInvocation => self.line("terminate_invocation"),
            InstKind::Nop => self.line("nop"),
        }
    }

    fn exit(&mut self, name: &str, inst: InstId) {
        let operands = operand_list(self.module, inst, 0);
        if operands.is_empty() {
            self.line(name);
        } else {
            let text = format!("{name} {operands}");
            self.line(&text);
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::instructions::BinaryOp;

    #[test]
    fn test_print_is_deterministic_and_uses_names() {
        let mut module = Module::new();
        let name = module.symbols.intern("main");
        let void = module.types.void();
        let i32_ty = module.types.i32_();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;

        {
            let mut builder = Builder::append(&mut module, entry);
            let one = builder.module.const_i32(1);
            let two = builder.module.const_i32(2);
            let sum = builder.binary(BinaryOp::Add, i32_ty, one, two);
            let bound = builder.module.symbols.intern("total");
            builder.let_(bound, sum);
            builder.ret(None);
        }

        let first = print_module(&module);
        let second = print_module(&module);
        assert_eq!(first, second);
        assert!(first.contains("@fragment fn main() -> void {"));
        assert!(first.contains("= add 1i, 2i"));
        assert!(first.contains("%total:i32 = let"));
        assert!(first.contains("ret"));
    }
}

//! Ordered pass execution.
//!
//! Pass order is a hard correctness dependency (e.g. the multiplanar
//! pass must run before anything that assumes external textures are
//! gone), so sequences are explicit lists built by the backend driver.
//! The first failing pass aborts the rest; the module it leaves behind
//! must not be handed to an emitter.

use crate::errors::TransformError;
use crate::ir::module::Module;
use crate::pass_log;
use crate::passes::PassResult;

pub struct PassEntry {
    pub name: &'static str,
    run: Box<dyn FnOnce(&mut Module) -> PassResult>,
}

impl PassEntry {
    pub fn new(
        name: &'static str,
        run: impl FnOnce(&mut Module) -> PassResult + 'static,
    ) -> PassEntry {
        PassEntry {
            name,
            run: Box::new(run),
        }
    }
}

/// Run each pass in order, stopping at the first failure. The failing
/// pass's name is prepended to its message so driver logs identify the
/// stage without a backtrace.
pub fn run_sequence(
    module: &mut Module,
    passes: Vec<PassEntry>,
) -> Result<(), TransformError> {
    for pass in passes {
        pass_log!("running pass: {}", pass.name);

        if let Err(error) = (pass.run)(module) {
            pass_log!("pass {} failed: {}", pass.name, error);
            return Err(TransformError {
                kind: error.kind,
                msg: format!("{}: {}", pass.name, error.msg),
            });
        }

        #[cfg(feature = "show_ir")]
        {
            crate::ir_log!(
                "module after {}:\n{}",
                pass.name,
                crate::ir::display::print_module(module)
            );
        }
    }
    Ok(())
}

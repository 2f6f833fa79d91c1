use crate::ast::{FunctionDef, Module, Param, ParamKind};
use crate::SourceFile;

/// The validated, parsed form of one submission.
///
/// Built once per evaluation and dropped when the evaluation ends; nothing
/// in a unit is shared with any other request.
#[derive(Debug)]
pub struct StructuralUnit {
    source: SourceFile,
    module: Module,
}

impl StructuralUnit {
    pub fn new(source: SourceFile, module: Module) -> Self {
        Self { source, module }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }
}

/// The entry point selected from a [`StructuralUnit`].
///
/// Borrows the unit it was extracted from, so it cannot outlive it.
#[derive(Debug, Clone, Copy)]
pub struct Callable<'u> {
    def: &'u FunctionDef,
    position: usize,
}

impl<'u> Callable<'u> {
    /// `position` is the index of the declaring statement in the module body.
    pub fn new(def: &'u FunctionDef, position: usize) -> Self {
        Self { def, position }
    }

    pub fn name(&self) -> &'u str {
        &self.def.name.name
    }

    pub fn def(&self) -> &'u FunctionDef {
        self.def
    }

    pub fn params(&self) -> &'u [Param] {
        &self.def.params
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn shape(&self) -> ParamShape {
        ParamShape::of(&self.def.params)
    }
}

/// Arity summary of a parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamShape {
    pub required: usize,
    pub optional: usize,
    pub keyword_only: usize,
    pub var_args: bool,
    pub var_keywords: bool,
}

impl ParamShape {
    pub fn of(params: &[Param]) -> Self {
        let mut shape = Self::default();
        for param in params {
            match param.kind {
                ParamKind::Positional if param.default.is_some() => shape.optional += 1,
                ParamKind::Positional => shape.required += 1,
                ParamKind::KeywordOnly => shape.keyword_only += 1,
                ParamKind::VarArgs => shape.var_args = true,
                ParamKind::VarKeywords => shape.var_keywords = true,
            }
        }
        shape
    }

    /// Largest positional argument count accepted, `None` when unbounded.
    pub fn max_positional(&self) -> Option<usize> {
        (!self.var_args).then_some(self.required + self.optional)
    }
}

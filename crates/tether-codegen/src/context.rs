use rustc_hash::{FxHashMap, FxHashSet};
use tether_layout::{DataModel, LayoutError, LayoutTable, RecordKey};
use tether_shape::{
    CType, DeclKind, Declaration, EnumSpec, FunctionSpec, GoNames, HostShape,
    NameTransformer, NativeShape, PointerHint, RecordSpec, ShapeTranslator,
};

use crate::config::{DeclHints, GeneratorConfig};
use crate::error::{GenError, GenResult};

/// Declarations by name, for lookups while binding other declarations.
#[derive(Debug, Default)]
pub struct DeclIndex {
    records: FxHashMap<RecordKey, RecordSpec>,
    enums: FxHashMap<String, EnumSpec>,
    callbacks: FxHashMap<String, FunctionSpec>,
}

impl DeclIndex {
    pub fn build(decls: &[Declaration]) -> GenResult<Self> {
        let mut index = DeclIndex::default();
        let mut functions = FxHashMap::default();
        for decl in decls {
            let fresh = match &decl.kind {
                DeclKind::Struct(spec) => index
                    .records
                    .insert(RecordKey::new(spec.tag.clone(), false), spec.clone())
                    .is_none(),
                DeclKind::Union(spec) => index
                    .records
                    .insert(RecordKey::new(spec.tag.clone(), true), spec.clone())
                    .is_none(),
                DeclKind::Enum(spec) => index.enums.insert(spec.tag.clone(), spec.clone()).is_none(),
                DeclKind::Callback(spec) => index
                    .callbacks
                    .insert(spec.name.clone(), spec.clone())
                    .is_none(),
                DeclKind::Function(spec) => functions.insert(spec.name.as_str(), ()).is_none(),
            };
            if !fresh {
                return Err(GenError::DuplicateDeclaration(format!(
                    "{} {}",
                    decl.kind_name(),
                    decl.name()
                )));
            }
        }
        Ok(index)
    }

    pub fn record(&self, tag: &str, union: bool) -> Option<&RecordSpec> {
        self.records.get(&RecordKey::new(tag, union))
    }

    pub fn records(&self) -> impl Iterator<Item = (&RecordSpec, bool)> {
        self.records.iter().map(|(key, spec)| (spec, key.union))
    }

    pub fn enum_spec(&self, tag: &str) -> Option<&EnumSpec> {
        self.enums.get(tag)
    }

    pub fn callback(&self, name: &str) -> Option<&FunctionSpec> {
        self.callbacks.get(name)
    }
}

/// Read-only state shared by every worker task of one run.
pub struct GenContext {
    pub config: GeneratorConfig,
    pub layouts: LayoutTable,
    pub decls: DeclIndex,
    names: Box<dyn NameTransformer>,
    /// Records that cannot be bound, so nothing may refer to them.
    skipped: FxHashSet<RecordKey>,
    layout_failures: FxHashMap<RecordKey, LayoutError>,
}

impl GenContext {
    pub fn new(config: GeneratorConfig, decls: &[Declaration]) -> GenResult<Self> {
        config.validate()?;
        let index = DeclIndex::build(decls)?;
        let model = DataModel::for_arch(config.arch)?;
        let mut layouts = LayoutTable::build(model, index.records());
        let layout_failures: FxHashMap<RecordKey, LayoutError> = layouts.take_failures().into_iter().collect();
        let skipped = layout_failures.keys().cloned().collect();
        let names = GoNames::new().with_trim_prefixes(config.trim_prefixes.iter().cloned());
        Ok(GenContext {
            config,
            layouts,
            decls: index,
            names: Box::new(names),
            skipped,
            layout_failures,
        })
    }

    /// Removes and returns why `key` has no layout, if it has none.
    pub fn take_layout_failure(&mut self, key: &RecordKey) -> Option<LayoutError> {
        self.layout_failures.remove(key)
    }

    pub fn has_layout_failure(&self, tag: &str, union: bool) -> bool {
        self.layout_failures.contains_key(&RecordKey::new(tag, union))
    }

    pub fn skip_record(&mut self, key: RecordKey) {
        self.skipped.insert(key);
    }

    pub fn is_skipped(&self, tag: &str, union: bool) -> bool {
        self.skipped.contains(&RecordKey::new(tag, union))
    }

    pub fn names(&self) -> &dyn NameTransformer {
        self.names.as_ref()
    }

    pub fn translator(&self) -> ShapeTranslator<'_> {
        ShapeTranslator::new(self.layouts.model(), self.names.as_ref())
    }

    /// Shapes of a struct member or function parameter.
    pub fn member_shapes(&self, hints: Option<&DeclHints>, member: &str, ty: &CType) -> (HostShape, NativeShape) {
        let pointer = self.config.member_pointer(hints, member);
        let memory = self.config.member_memory(hints, member, ty);
        let translator = self.translator();
        (translator.translate(ty, pointer, memory), translator.native(ty))
    }

    pub fn return_shapes(&self, hints: Option<&DeclHints>, ty: &CType) -> (HostShape, NativeShape) {
        let pointer: Option<PointerHint> = hints.and_then(|h| h.ret_pointer);
        let memory = self
            .config
            .settle_memory(hints.and_then(|h| h.ret_memory), "return value", ty);
        let translator = self.translator();
        (translator.translate_return(ty, pointer, memory), translator.native(ty))
    }

    pub fn max_mem(&self) -> &str {
        &self.config.options.max_mem
    }

    pub fn safe_strings(&self) -> bool {
        self.config.options.safe_strings
    }
}

impl std::fmt::Debug for GenContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenContext")
            .field("package", &self.config.package)
            .field("arch", &self.config.arch)
            .finish_non_exhaustive()
    }
}

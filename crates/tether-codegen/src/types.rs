//! Enums and callback types.

use tether_shape::{EnumSpec, FunctionSpec, Position};

use crate::context::GenContext;
use crate::emit::CodeWriter;
use crate::unit::GeneratedBlock;

pub fn emit_enum(ctx: &GenContext, spec: &EnumSpec, position: &Position) -> GeneratedBlock {
    let names = ctx.names();
    let ty = names.type_name(&spec.tag);
    let mut w = CodeWriter::new();
    w.line(format!("// {} as declared in {}", ty, position));
    w.line(format!("type {} int32", ty));
    if !spec.values.is_empty() {
        w.blank();
        w.line(format!("// {} enumeration from {}", ty, position));
        w.open("const (");
        for value in &spec.values {
            w.line(format!("{} {} = {}", names.type_name(&value.name), ty, value.value));
        }
        w.close(")");
    }
    GeneratedBlock::new(ty, "enum", w.finish())
}

/// Function pointer types stay opaque: values come from C and go back to C.
pub fn emit_callback(ctx: &GenContext, spec: &FunctionSpec, position: &Position) -> GeneratedBlock {
    let ty = ctx.names().type_name(&spec.name);
    let mut w = CodeWriter::new();
    w.line(format!("// {} is a C function pointer, declared in {}", ty, position));
    w.line(format!("type {} *[0]byte", ty));
    GeneratedBlock::new(ty, "callback", w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use tether_shape::EnumValue;

    #[test]
    fn test_enum_block() {
        let ctx = GenContext::new(GeneratorConfig::default(), &[]).unwrap();
        let spec = EnumSpec {
            tag: "mode".to_string(),
            values: vec![
                EnumValue {
                    name: "mode_fast".to_string(),
                    value: 0,
                },
                EnumValue {
                    name: "mode_safe".to_string(),
                    value: -1,
                },
            ],
        };
        let block = emit_enum(&ctx, &spec, &Position::default());
        assert_eq!(
            block.source,
            "// Mode as declared in <unknown>\ntype Mode int32\n\n// Mode enumeration from <unknown>\nconst (\n\tModeFast Mode = 0\n\tModeSafe Mode = -1\n)\n"
        );
    }

    #[test]
    fn test_callback_is_opaque() {
        let ctx = GenContext::new(GeneratorConfig::default(), &[]).unwrap();
        let spec = FunctionSpec {
            name: "compare_fn".to_string(),
            params: Vec::new(),
            ret: None,
        };
        let block = emit_callback(&ctx, &spec, &Position::default());
        assert!(block.source.contains("type CompareFn *[0]byte"));
    }
}

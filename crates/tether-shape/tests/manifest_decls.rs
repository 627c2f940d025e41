use serde::Deserialize;
use tether_shape::{CBase, CBaseKind, DeclKind, Declaration, Dim};

#[derive(Deserialize)]
struct Decls {
    declarations: Vec<Declaration>,
}

#[test]
fn test_declarations_deserialize_from_toml() {
    let source = r#"
        [[declarations]]
        kind = "struct"
        tag = "node"
        position = { file = "list.h", line = 12 }
        fields = [
            { name = "value", type = { base = "int" } },
            { name = "next", type = { base = "struct node", pointers = 1 } },
            { name = "grid", type = { base = "double", outer = [4, { name = "COLS", value = 3 }] } },
        ]

        [[declarations]]
        kind = "function"
        name = "read_blob"
        params = [
            { name = "count", type = { base = "int", pointers = 1 } },
            { name = "path", type = { base = "char", pointers = 1, const = true } },
        ]
        ret = { base = "unsigned char", pointers = 1 }

        [[declarations]]
        kind = "enum"
        tag = "color"
        values = [{ name = "RED", value = 0 }, { name = "GREEN", value = 1 }]
    "#;
    let decls: Decls = toml::from_str(source).expect("manifest should parse");
    assert_eq!(decls.declarations.len(), 3);

    let node = &decls.declarations[0];
    assert_eq!(node.name(), "node");
    assert_eq!(node.position.to_string(), "list.h:12");
    let DeclKind::Struct(record) = &node.kind else {
        panic!("expected a struct, got {:?}", node.kind);
    };
    assert_eq!(record.fields[1].ty.base, CBase::Struct("node".into()));
    assert_eq!(record.fields[1].ty.pointers, 1);
    assert_eq!(
        record.fields[2].ty.outer,
        vec![
            Dim::Fixed(4),
            Dim::Named {
                name: "COLS".into(),
                value: 3
            }
        ]
    );

    let DeclKind::Function(func) = &decls.declarations[1].kind else {
        panic!("expected a function");
    };
    assert!(func.params[1].ty.is_const);
    assert_eq!(
        func.ret.as_ref().and_then(|ret| ret.base.builtin_kind()),
        Some(CBaseKind::UChar)
    );
    assert!(func.returns_value());
    assert_eq!(decls.declarations[2].kind_name(), "enum");
}

#[test]
fn test_unknown_base_is_rejected() {
    let source = r#"
        [[declarations]]
        kind = "function"
        name = "f"
        params = [{ name = "x", type = { base = "int128" } }]
    "#;
    let err = toml::from_str::<Decls>(source).err().expect("int128 is not a known base");
    assert!(err.to_string().contains("int128"));
}

/*!
 * DEX Reader Tests
 */

use crate::common::DexBuilder;
use pretty_assertions::assert_eq;
use sdksandbox_core::verifier::dex::{DexFile, DexSymbols, FieldRef, MethodRef};
use sdksandbox_core::SandboxError;

const SDK_CLASS: &str = "Lcom/example/sdk/Entry;";
const BUNDLE: &str = "Landroid/os/Bundle;";
const STRING: &str = "Ljava/lang/String;";

fn sample_image() -> Vec<u8> {
    DexBuilder::new()
        .define_class(SDK_CLASS)
        .method(SDK_CLASS, "run", &[], "V")
        .method(BUNDLE, "putString", &[STRING, STRING], "V")
        .method(BUNDLE, "size", &[], "I")
        .method("[I", "clone", &[], "Ljava/lang/Object;")
        .field("Landroid/os/Build;", "MODEL", STRING)
        .field(SDK_CLASS, "state", "J")
        .build()
}

fn collect(image: &[u8]) -> DexSymbols {
    let dex = DexFile::parse(image).unwrap();
    let mut symbols = DexSymbols::new();
    dex.collect_external_symbols(&mut symbols).unwrap();
    symbols
}

#[test]
fn test_external_methods_in_java_notation() {
    let symbols = collect(&sample_image());

    let methods: Vec<MethodRef> = symbols.methods().cloned().collect();
    assert_eq!(
        methods,
        vec![
            MethodRef::new(
                "android.os.Bundle",
                "putString",
                vec!["java.lang.String".to_string(), "java.lang.String".to_string()],
                "void",
            ),
            MethodRef::new("android.os.Bundle", "size", vec![], "int"),
        ]
    );
    assert!(symbols.has_referenced_method("android.os.Bundle", "size"));
    assert!(!symbols.has_referenced_method("com.example.sdk.Entry", "run"));
}

#[test]
fn test_external_fields_only() {
    let symbols = collect(&sample_image());

    let fields: Vec<FieldRef> = symbols.fields().cloned().collect();
    assert_eq!(
        fields,
        vec![FieldRef {
            class: "android.os.Build".to_string(),
            name: "MODEL".to_string(),
            field_type: "java.lang.String".to_string(),
        }]
    );
    assert!(!symbols.has_referenced_field("com.example.sdk.Entry", "state"));
}

#[test]
fn test_symbols_accumulate_across_images() {
    let first = DexBuilder::new()
        .method(BUNDLE, "size", &[], "I")
        .build();
    let second = DexBuilder::new()
        .method("Landroid/content/Context;", "getPackageName", &[], STRING)
        .method(BUNDLE, "size", &[], "I")
        .build();

    let mut symbols = DexSymbols::new();
    for image in [&first, &second] {
        DexFile::parse(image)
            .unwrap()
            .collect_external_symbols(&mut symbols)
            .unwrap();
    }
    assert_eq!(symbols.method_count(), 2);
}

#[test]
fn test_array_parameters_rendered() {
    let image = DexBuilder::new()
        .method(BUNDLE, "putIntArray", &[STRING, "[I"], "V")
        .build();
    let symbols = collect(&image);
    let method = symbols.methods().next().unwrap();
    assert_eq!(method.parameters, vec!["java.lang.String", "int[]"]);
    assert_eq!(method.return_type, "void");
}

#[test]
fn test_supported_versions() {
    for version in [b"035", b"039", b"041"] {
        let image = DexBuilder::new().version(version).build();
        let dex = DexFile::parse(&image).unwrap();
        assert!(dex.header().version >= 35);
    }

    for version in [b"034", b"042"] {
        let image = DexBuilder::new().version(version).build();
        assert!(matches!(
            DexFile::parse(&image),
            Err(SandboxError::CorruptFormat(_))
        ));
    }
}

#[test]
fn test_truncated_image_rejected() {
    let image = sample_image();
    for length in [0, 16, 0x60, image.len() - 1] {
        assert!(
            matches!(
                DexFile::parse(&image[..length]),
                Err(SandboxError::CorruptFormat(_))
            ),
            "length {} should be rejected",
            length
        );
    }
}

#[test]
fn test_bad_magic_and_endian_rejected() {
    let mut image = sample_image();
    image[0] = b'x';
    assert!(matches!(
        DexFile::parse(&image),
        Err(SandboxError::CorruptFormat(_))
    ));

    let mut image = sample_image();
    image[40..44].copy_from_slice(&0x7856_3412u32.to_le_bytes());
    assert!(matches!(
        DexFile::parse(&image),
        Err(SandboxError::CorruptFormat(_))
    ));
}

#[test]
fn test_out_of_range_table_rejected() {
    let mut image = sample_image();
    // method_ids size
    image[88..92].copy_from_slice(&10_000u32.to_le_bytes());
    assert!(matches!(
        DexFile::parse(&image),
        Err(SandboxError::CorruptFormat(_))
    ));
}

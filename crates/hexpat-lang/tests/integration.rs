// Integration tests for the pattern language engine

use hexpat_lang::{
    execute_string, EnumEntry, Endianness, ErrorKind, EvalOptions, Level, Pattern, PatternEngine, PatternKind,
    RunError, RunResult, SliceProvider, Value,
};

fn run(source: &str, data: &[u8]) -> RunResult {
    execute_string(&SliceProvider::new(data), source).expect("run failed")
}

fn run_err(source: &str, data: &[u8]) -> RunError {
    execute_string(&SliceProvider::new(data), source).expect_err("run should fail")
}

fn run_little(source: &str, data: &[u8]) -> Vec<Pattern> {
    let mut engine = PatternEngine::new();
    engine.options_mut().default_endian = Endianness::Little;
    engine
        .execute_string(&SliceProvider::new(data), source)
        .expect("run failed")
        .patterns
}

// ========== End-to-end scenarios ==========

#[test]
fn test_integer_placement() {
    let patterns = run_little("u32 value @ 0x00;", &[0x01, 0x00, 0x00, 0x00]);
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].name, "value");
    assert_eq!(patterns[0].offset, 0);
    assert_eq!(patterns[0].size, 4);
    assert_eq!(patterns[0].kind, PatternKind::Unsigned(1));
}

#[test]
fn test_endianness_override() {
    let patterns = run_little("be u32 value @ 0x00;", &[0x01, 0x00, 0x00, 0x00]);
    assert_eq!(patterns[0].kind, PatternKind::Unsigned(16777216));
    assert_eq!(patterns[0].endian, Endianness::Big);
    assert_eq!(patterns[0].formatted_type_name(), "be u32");
}

#[test]
fn test_length_prefixed_string() {
    let source = r#"
        struct Pascal { u8 len; char data[len]; };
        Pascal s @ 0x00;
    "#;
    let result = run(source, &[0x03, 0x41, 0x42, 0x43, 0x00]);
    let s = &result.patterns[0];
    assert_eq!(s.name, "s");
    assert_eq!(s.type_name, "Pascal");
    assert_eq!(s.size, 4);
    assert_eq!(s.children().len(), 2);

    let len = s.member("len").unwrap();
    assert_eq!((len.offset, len.size), (0, 1));
    assert_eq!(len.kind, PatternKind::Unsigned(3));

    let data = s.member("data").unwrap();
    assert_eq!((data.offset, data.size), (1, 3));
    assert_eq!(data.kind, PatternKind::String("ABC".into()));
    assert_eq!(data.formatted_value(&SliceProvider::new(&[])), "\"ABC\"");
}

#[test]
fn test_union_members_share_offset() {
    let result = run("union U { u32 i; float f; }; U u @ 0x00;", &[0x7F, 0xFF, 0xFF, 0xFF]);
    let u = &result.patterns[0];
    assert_eq!(u.size, 4);
    assert_eq!(u.children().len(), 2);
    for child in u.children() {
        assert_eq!(child.offset, u.offset);
        assert!(child.size <= u.size);
    }
    assert!(matches!(u.children()[1].kind, PatternKind::Float(_)));
}

#[test]
fn test_pointer_follows_address() {
    let patterns = run_little("u8 *p : u32 @ 0x00;", &[0x04, 0x00, 0x00, 0x00, 0xAA]);
    let p = &patterns[0];
    assert_eq!((p.offset, p.size), (0, 4));
    assert_eq!(p.type_name, "u8*");
    let PatternKind::Pointer { pointee, address } = &p.kind else {
        panic!("expected a pointer, got {:?}", p.kind);
    };
    assert_eq!(*address, 4);
    assert_eq!(pointee.offset, 4);
    assert_eq!(pointee.kind, PatternKind::Unsigned(0xAA));
}

#[test]
fn test_recursion_ceiling() {
    let err = run_err("struct S { S inner; };\nS s @ 0x00;", &[0; 16]);
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    assert!(err.message().contains("recursion limit"), "{}", err.message());
}

// ========== Boundary behaviours ==========

#[test]
fn test_empty_source_on_empty_provider() {
    let result = run("", &[]);
    assert!(result.patterns.is_empty());
    assert!(result.console.is_empty());
}

#[test]
fn test_placement_into_empty_provider_fails() {
    let err = run_err("u8 x @ 0;", &[]);
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    assert_eq!(err.line(), 1);
}

#[test]
fn test_integer_literal_limits() {
    let result = run(
        "u128 v out;\nv = 0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF;",
        &[],
    );
    assert_eq!(result.out_variables[0].1, Value::Unsigned(u128::MAX));

    let err = run_err("u128 v = 340282366920938463463374607431768211456;", &[]);
    assert_eq!(err.kind(), ErrorKind::Lexical);
}

#[test]
fn test_static_array_of_empty_structs() {
    let result = run("struct Empty {}; struct S { Empty e[3]; }; S s @ 0;", &[]);
    let s = &result.patterns[0];
    assert_eq!(s.size, 0);
    assert_eq!(s.children()[0].entry_count(), 3);
}

#[test]
fn test_patterns_stay_within_data() {
    let data = [0u8; 8];
    let err = run_err("u32 a @ 0; u64 b @ 4;", &data);
    assert!(err.message().contains("outside of the data"), "{}", err.message());
    assert!(run("u32 a @ 0; u32 b @ 4;", &data).patterns.iter().all(|p| p.end() <= 8));
}

// ========== Types ==========

#[test]
fn test_enum_and_struct_header() {
    let source = r#"
        enum FileType : u8 {
            Text,
            Binary = 5,
            Archive
        };

        struct FileHeader {
            u32 magic;
            FileType type;
            FileType other;
        };

        le FileHeader header @ 0x00;
    "#;
    let result = run(source, &[0x50, 0x4B, 0x03, 0x04, 0x06, 0x09]);
    let header = &result.patterns[0];
    assert_eq!(header.member("magic").unwrap().kind, PatternKind::Unsigned(0x04034B50));

    let ty = header.member("type").unwrap();
    let PatternKind::Enum { value, entries, .. } = &ty.kind else {
        panic!("expected an enum, got {:?}", ty.kind);
    };
    assert_eq!(*value, 6);
    assert_eq!(
        entries[2],
        EnumEntry {
            name: "Archive".into(),
            value: 6
        }
    );
    let provider = SliceProvider::new(&[]);
    assert_eq!(ty.formatted_value(&provider), "FileType::Archive");
    assert_eq!(header.member("other").unwrap().formatted_value(&provider), "FileType::???");
}

#[test]
fn test_bitfield_fields() {
    let source = r#"
        bitfield Flags {
            a : 1;
            b : 3;
            c : 4;
        };
        Flags f @ 0;
    "#;
    let result = run(source, &[0b1010_0101]);
    let f = &result.patterns[0];
    assert_eq!(f.size, 1);
    let values: Vec<u128> = f
        .children()
        .iter()
        .map(|field| match field.kind {
            PatternKind::BitfieldField { value, .. } => value,
            _ => panic!("expected a bitfield field"),
        })
        .collect();
    assert_eq!(values, vec![1, 0b010, 0b1010]);
}

#[test]
fn test_struct_inheritance_reads_parent_first() {
    let source = r#"
        struct Base { u8 kind; };
        struct Derived : Base { u8 payload; };
        Derived d @ 0;
    "#;
    let result = run(source, &[7, 9]);
    let names: Vec<&str> = result.patterns[0].children().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["kind", "payload"]);
    assert_eq!(result.patterns[0].size, 2);
}

#[test]
fn test_namespaced_types_and_functions() {
    let source = r#"
        namespace fmt::v1 {
            struct Header { u16 version; };
            fn twice(u32 x) { return x * 2; };
        }
        fmt::v1::Header h @ 0;
        u32 doubled out;
        doubled = fmt::v1::twice(h.version);
    "#;
    let mut engine = PatternEngine::new();
    engine.options_mut().default_endian = Endianness::Little;
    let result = engine.execute_string(&SliceProvider::new(&[0x02, 0x01]), source).unwrap();
    assert_eq!(result.patterns[0].type_name, "fmt::v1::Header");
    assert_eq!(result.out_variables, vec![("doubled".to_string(), Value::Unsigned(0x204))]);
}

#[test]
fn test_dynamic_array_while_condition() {
    let source = r#"
        struct Chunk { u8 tag; u8 len; };
        Chunk chunks[while(std::mem::read_unsigned($, 1) != 0xFF)] @ 0;
    "#;
    let result = run(source, &[1, 2, 3, 4, 0xFF]);
    let chunks = &result.patterns[0];
    assert_eq!(chunks.entry_count(), 2);
    assert_eq!(chunks.size, 4);
    assert_eq!(chunks.children()[1].name, "[1]");
}

#[test]
fn test_static_array_entries_read_on_demand() {
    let data = [1, 0, 2, 0, 3, 0];
    let patterns = run_little("u16 values[3] @ 0;", &data);
    let values = &patterns[0];
    assert_eq!(values.type_name, "u16[3]");
    assert!(values.children().is_empty());
    let provider = SliceProvider::new(&data);
    let last = values.entry(2, &provider).unwrap();
    assert_eq!(last.offset, 4);
    assert_eq!(last.kind, PatternKind::Unsigned(3));
    assert!(values.entry(3, &provider).is_none());
}

#[test]
fn test_padding_and_unsized_string() {
    let result = run("struct S { padding[2]; char name[]; u8 after; }; S s @ 0;", b"\0\0hi\0!");
    let s = &result.patterns[0];
    assert_eq!(s.children()[0].kind, PatternKind::Padding);
    assert_eq!(s.member("name").unwrap().kind, PatternKind::String("hi".into()));
    assert_eq!(s.member("after").unwrap().offset, 5);
}

// ========== Language features ==========

#[test]
fn test_console_output_and_format() {
    let source = r#"
        u8 magic @ 0;
        std::print("magic = {:#04x}", magic);
        std::warning("careful");
    "#;
    let result = run(source, &[0x7F]);
    assert_eq!(result.console.len(), 2);
    assert_eq!(result.console[0].level, Level::Info);
    assert_eq!(result.console[0].message, "magic = 0x7f");
    assert_eq!(result.console[1].level, Level::Warning);
}

#[test]
fn test_main_result_and_out_variables() {
    let source = r#"
        u32 total out;
        fn sum(auto ... values) {
            u32 acc = 0;
            for (u32 i = 0, i < 3, i += 1) {
                acc += std::mem::read_unsigned(i, 1);
            }
            return acc;
        };
        fn main() {
            total = sum();
            return total + 1;
        };
    "#;
    let result = run(source, &[1, 2, 3]);
    assert_eq!(result.out_variables, vec![("total".to_string(), Value::Unsigned(6))]);
    assert_eq!(result.main_result, Some(Value::Unsigned(7)));
}

#[test]
fn test_parameter_pack_size() {
    let source = r#"
        fn count(u8 first, auto ... rest) {
            return std::sizeof_pack(rest);
        };
        u32 none out;
        u32 three out;
        none = count(1);
        three = count(1, 2, "x", 4.0);
    "#;
    let result = run(source, &[]);
    assert_eq!(result.out_variables[0].1, Value::Unsigned(0));
    assert_eq!(result.out_variables[1].1, Value::Unsigned(3));
}

#[test]
fn test_string_and_math_library() {
    let source = r#"
        char tag[4] @ 0;
        u32 version out;
        u32 root out;
        version = std::string::parse_int(std::string::substr(tag, 1, 3), 10);
        root = std::math::sqrt(version + 15);
        std::print("{} {}", std::string::length(tag), std::string::at(tag, -1));
    "#;
    let result = run(source, &[b'v', b'1', b'0', b'6']);
    assert_eq!(result.out_variables[0].1, Value::Unsigned(106));
    assert_eq!(result.out_variables[1].1, Value::Unsigned(11));
    assert_eq!(result.console[0].message, "4 6");
}

#[test]
fn test_oversized_string_repetition_fails_cleanly() {
    let err = run_err("str s = \"ab\" * 0xFFFFFFFFFFFFFFFF;", &[]);
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    assert!(err.message().contains("string limit"), "{}", err.message());

    let err = run_err("std::print(\"{:1000000000000000}\", 1);", &[]);
    assert_eq!(err.kind(), ErrorKind::Evaluation);

    let err = run_err("str s = std::mem::read_string(0, 0x7FFFFFFFFFFFFFFF);", &[1, 2]);
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    assert!(err.message().contains("outside the data"), "{}", err.message());
}

#[test]
fn test_in_variables() {
    let mut engine = PatternEngine::new();
    let mut options = EvalOptions::default();
    options.in_variables.insert("offset".into(), Value::Unsigned(1));
    engine.set_options(options);
    let result = engine
        .execute_string(&SliceProvider::new(&[0, 0x42]), "u8 offset in;\nu8 value @ offset;")
        .unwrap();
    assert_eq!(result.patterns[0].kind, PatternKind::Unsigned(0x42));

    let err = execute_string(&SliceProvider::new(&[]), "u8 offset in;").unwrap_err();
    assert!(err.message().contains("no value provided"), "{}", err.message());
}

#[test]
fn test_start_offset_moves_cursor() {
    let mut engine = PatternEngine::new();
    engine.options_mut().start_offset = 2;
    let result = engine.execute_string(&SliceProvider::new(&[1, 2, 3]), "u8 x @ $;").unwrap();
    assert_eq!(result.patterns[0].offset, 2);
    assert_eq!(result.patterns[0].kind, PatternKind::Unsigned(3));
}

#[test]
fn test_base_address_offsets_are_logical() {
    let data = [0x11, 0x22];
    let provider = SliceProvider::new(&data).with_base_address(0x1000);
    let result = execute_string(&provider, "u64 start out;\nstart = $;\nu8 a @ $;\nu8 b @ 0x1001;").unwrap();
    assert_eq!(result.out_variables[0].1, Value::Unsigned(0x1000));
    assert_eq!(result.patterns[0].offset, 0x1000);
    assert_eq!(result.patterns[0].kind, PatternKind::Unsigned(0x11));
    assert_eq!(result.patterns[1].kind, PatternKind::Unsigned(0x22));
}

#[test]
fn test_assert_aborts_with_console_log() {
    let err = run_err("std::print(\"start\");\nstd::assert(1 == 2, \"mismatch\");", &[]);
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    assert_eq!(err.message(), "mismatch");
    assert_eq!(err.line(), 2);
    assert_eq!(err.console[0].message, "start");
}

#[test]
fn test_attributes_on_placements() {
    let source = r#"
        struct S {
            u8 hidden_byte [[hidden]];
            u8 named [[name("Pretty"), comment("note"), color("FF0000")]];
        };
        S s @ 0;
    "#;
    let result = run(source, &[1, 2]);
    let s = &result.patterns[0];
    assert!(s.children()[0].hidden);
    let named = &s.children()[1];
    assert_eq!(named.display_name(), "Pretty");
    assert_eq!(named.comment.as_deref(), Some("note"));
    assert_eq!(named.color, 0xFF0000FF);
}

#[test]
fn test_default_colours_are_deterministic() {
    let source = "u8 a @ 0; u8 b @ 1; u8 c @ 2;";
    let first = run(source, &[0; 3]);
    let second = run(source, &[0; 3]);
    let colours = |r: &RunResult| r.patterns.iter().map(|p| p.color).collect::<Vec<_>>();
    assert_eq!(colours(&first), colours(&second));
    assert_ne!(first.patterns[0].color, first.patterns[1].color);
}

use super::*;
use crate::error::FormatError;
use serde_json::json;
use std::io::Write as _;

fn kwdict() -> Kwdict {
    match json!({
        "a": "hElLo wOrLd",
        "b": "äöü",
        "d": {"a": "foo", "b": 0, "c": null},
        "l": ["a", "b", "c"],
        "n": null,
        "s": " \n\r\tSPACE    ",
        "u": "&#x27;&lt; / &gt;&#x27;",
        "t": 1262304000,
        "dt": "2010-01-01T00:00:00",
        "name": "Name",
        "title1": "Title",
        "title2": "",
        "title3": null,
        "title4": 0,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn run(template: &str, expected: &str) {
    run_with_default(template, expected, Value::Null);
}

fn run_with_default(template: &str, expected: &str, default: Value) {
    let cache = FormatterCache::new();
    let formatter = cache
        .compile(template, &default, BaseFormat::Str)
        .unwrap_or_else(|e| panic!("{template}: {e}"));
    assert_eq!(formatter.format_map(&kwdict()), expected, "{template}");
}

#[test]
fn uppercase_conversion() {
    let cache = FormatterCache::new();
    let formatter = cache.parse("{name!u}").unwrap();
    let mut item = Kwdict::new();
    item.insert("name".to_string(), json!("abc"));
    assert_eq!(formatter.format_map(&item), "ABC");
}

#[test]
fn conversions() {
    let a = "hElLo wOrLd";
    run("{a!l}", "hello world");
    run("{a!u}", "HELLO WORLD");
    run("{a!c}", "Hello world");
    run("{a!C}", "Hello World");
    run("{s!t}", "SPACE");
    run("{a!U}", a);
    run("{u!U}", "'< / >'");
    run("{a!s}", a);
    run("{a!r}", &format!("'{a}'"));
    run("{a!a}", &format!("'{a}'"));
    run("{b!a}", "'\\xe4\\xf6\\xfc'");
    run("{a!S}", a);
    run("{l!S}", "a, b, c");
    run("{n!S}", "");
    run("{t!d}", "2010-01-01 00:00:00");
    run("{t!d:%Y-%m-%d}", "2010-01-01");
    run("{dt!T}", "1262304000");
    run("{l!j}", r#"["a", "b", "c"]"#);
    run("{a!g}", "hello-world");
    run("{l!n}", "3");
}

#[test]
fn unknown_conversion_fails_to_compile() {
    let cache = FormatterCache::new();
    let err = cache.parse("{a!z}").unwrap_err();
    assert!(matches!(
        err,
        FormatError::UnknownConversion { conversion: 'z', .. }
    ));
}

#[test]
fn optional() {
    run("{name}{title1}", "NameTitle");
    run("{name}{title1:?//}", "NameTitle");
    run("{name}{title1:? **/''/}", "Name **Title''");

    run("{name}{title2}", "Name");
    run("{name}{title2:?//}", "Name");
    run("{name}{title2:? **/''/}", "Name");

    run("{name}{title3}", "NameNone");
    run("{name}{title3:?//}", "Name");
    run("{name}{title3:? **/''/}", "Name");

    run("{name}{title4}", "Name0");
    run("{name}{title4:?//}", "Name");
    run("{name}{title4:? **/''/}", "Name");
}

#[test]
fn missing() {
    run("{missing}", "None");
    run("{missing.attr}", "None");
    run("{missing[key]}", "None");
    run("{missing:?a//}", "");

    run("{name[missing]}", "None");
    run("{name[missing].attr}", "None");
    run("{name[missing][key]}", "None");
    run("{name[missing]:?a//}", "");
}

#[test]
fn missing_custom_default() {
    let default = json!("foobar");
    run_with_default("{missing}", "foobar", default.clone());
    run_with_default("{missing.attr}", "foobar", default.clone());
    run_with_default("{missing[key]}", "foobar", default.clone());
    run_with_default("{missing:?a//}", "afoobar", default);
}

#[test]
fn alternatives() {
    let a = "hElLo wOrLd";
    run("{a|z}", a);
    run("{z|a}", a);
    run("{z|y|a}", a);
    run("{z|y|x|a}", a);
    run("{z|n|a|y}", a);

    run("{z|a!C}", "Hello World");
    run("{z|a:Rh/C/}", "CElLo wOrLd");
    run("{z|a!C:RH/C/}", "Cello World");
    run("{z|y|x:?</>/}", "");

    run("{d[c]|d[b]|d[a]}", "foo");
    run("{d[a]|d[b]|d[c]}", "foo");
    run("{d[z]|d[y]|d[x]}", "None");
}

#[test]
fn indexing_and_slicing() {
    let a: Vec<char> = "hElLo wOrLd".chars().collect();
    let slice = |r: std::ops::Range<usize>| a[r].iter().collect::<String>();
    run("{l[0]}", "a");
    run("{a[6]}", "w");
    run("{a[1:10]}", &slice(1..10));
    run("{a[-10:-1]}", &slice(1..10));
    run("{a[5:]}", &slice(5..11));
    run("{a[50:]}", "");
    run("{a[:5]}", &slice(0..5));
    run("{a[:]}", "hElLo wOrLd");
    run("{a[1:10:2]}", "EL OL");
    run("{a[::]}", "hElLo wOrLd");
    run("{b[b1:]}", "öü");
}

#[test]
fn maxlen() {
    let a = "hElLo wOrLd";
    run("{a:L5/foo/}", "foo");
    run("{a:L50/foo/}", a);
    run("{a:L50/foo/>50}", &format!("{}{a}", " ".repeat(39)));
    run("{a:L50/foo/>51}", "foo");
    run("{a:Lab/foo/}", "foo");
}

#[test]
fn join() {
    run("{l:J}", "abc");
    run("{l:J,}", "a,b,c");
    run("{l:J,/}", "a,b,c");
    run("{l:J,/>20}", "               a,b,c");
    run("{l:J - }", "a - b - c");
    run("{l:J - /}", "a - b - c");
    run("{l:J - />20}", "           a - b - c");
    run("{a:J/}", "hElLo wOrLd");
    run("{a:J, /}", "h, E, l, L, o,  , w, O, r, L, d");
}

#[test]
fn replace() {
    run("{a:Rh/C/}", "CElLo wOrLd");
    run("{a!l:Rh/C/}", "Cello world");
    run("{a!u:Rh/C/}", "HELLO WORLD");
    run("{a!l:Rl/_/}", "he__o wor_d");
    run("{a!l:Rl//}", "heo word");
    run("{name:Rame/othing/}", "Nothing");
}

#[test]
fn chained_specs() {
    run("{a:Rh/C/RE/e/RL/l/}", "Cello wOrld");
    run("{d[b]!s:R1/Q/R2/A/R0/Y/}", "Y");
    run("{l:J-/Rb/E/}", "a-E-c");
    run("{d[a]:?</>/L1/too long/}", "<too long>");
    run("{d[c]:?</>/L5/too long/}", "");
}

#[test]
fn datetime_specs() {
    run("{dt:%Y}", "2010");
    run("{dt:D%Y-%m-%dT%H:%M:%S/O+01:00/%H:%M}", "01:00");
    run("{t:A+60/}", "1262304060");
}

#[test]
fn specials() {
    run("{_lit[foo]}", "foo");
    run("{'bar'!u}", "BAR");
    run("{_nul}", "None");
    run("{_nul|name}", "Name");
}

#[test]
fn call_time_errors_fall_back_to_default() {
    // conversion on a list fails, default renders through the chain
    run("{l!l}", "None");
    run_with_default("{l!l}", "x", json!("X"));
    // spec not applicable to the value or the default
    run("{l:>5}", "None");
}

#[test]
fn escapes_and_literals() {
    run("{{name}}", "{name}");
    run("plain text", "plain text");
    run("", "");
}

#[test]
fn malformed_templates_fail_to_compile() {
    let cache = FormatterCache::new();
    for template in ["{a", "a}", "{a:?x/}", "{a:Rfoo}", "{a!}", "{a:Cz/}"] {
        assert!(cache.parse(template).is_err(), "{template}");
    }
}

#[test]
fn compile_is_memoized() {
    let cache = FormatterCache::new();
    let first = cache.parse("{a}").unwrap();
    let second = cache.parse("{a}").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    let other_default = cache
        .compile("{a}", &json!("x"), BaseFormat::Str)
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &other_default));
    let other_base = cache.compile("{a}", &Value::Null, BaseFormat::Json).unwrap();
    assert!(!Arc::ptr_eq(&first, &other_base));
    assert_eq!(cache.len(), 3);
}

#[test]
fn compiled_formatters_are_deterministic() {
    let cache = FormatterCache::new();
    let formatter = cache.parse("{a!l:Rl/_/}-{l:J,/}-{d[b]:>3}").unwrap();
    let first = formatter.format_map(&kwdict());
    for _ in 0..5 {
        assert_eq!(formatter.format_map(&kwdict()), first);
    }
}

#[test]
fn json_base_format() {
    let cache = FormatterCache::new();
    let formatter = cache
        .compile("{l}|{name}|{d[b]:>3}", &Value::Null, BaseFormat::Json)
        .unwrap();
    assert_eq!(formatter.format_map(&kwdict()), r#"["a", "b", "c"]|"Name"|  0"#);
}

#[test]
fn expression_front_end() {
    run("\u{c}E name + '_' + str(title4)", "Name_0");
    run("\u{c}E missing", "None");
    run_with_default("\u{c}E 'ab' * 9999999999", "oversized", json!("oversized"));
    let cache = FormatterCache::new();
    assert!(matches!(
        cache.parse("\u{c}E name +"),
        Err(FormatError::Expression { .. })
    ));
}

#[test]
fn fstring_front_end() {
    run("\u{c}F {name.upper()}-{title4 + 1:0>3}", "NAME-001");
    run("\u{c}F {l[-1]!u} {{x}}", "C {x}");
}

#[test]
fn template_file_front_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{name}}/{{title1!l}}").unwrap();
    let template = format!("\u{c}T {}", file.path().display());
    run(&template, "Name/title");

    let cache = FormatterCache::new();
    assert!(matches!(
        cache.parse("\u{c}T /nonexistent/template.txt"),
        Err(FormatError::TemplateFile { .. })
    ));
}

#[test]
fn function_front_end() {
    let cache = FormatterCache::new();
    cache.register_function(
        "count",
        Arc::new(|kwdict: &Kwdict| kwdict.len().to_string()),
    );
    let formatter = cache.parse("\u{c}M count").unwrap();
    assert_eq!(formatter.format_map(&kwdict()), "14");
    assert!(matches!(
        cache.parse("\u{c}M missing"),
        Err(FormatError::UnknownFunction(_))
    ));
}

#[test]
fn unknown_front_end() {
    let cache = FormatterCache::new();
    assert!(cache.parse("\u{c}Q {a}").is_err());
}

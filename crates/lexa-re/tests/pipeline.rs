use lexa_re::ast::SourcePos;
use lexa_re::options::TableConfig;
use lexa_re::scanner::ScannerResult;
use lexa_re::{
    build, BuildError, Compression, ConditionId, ConfigError, DiagnosticKind, Diagnostics, LexSpec, Options,
    Pattern, Rule, RuleConditions, RuleId, Severity, TableScanner, Tables,
};

fn rule(pattern: &str) -> Rule {
    Rule::new(Pattern::parse(pattern).expect("failed to parse pattern"))
}

fn in_condition(pattern: &str, condition: &str) -> Rule {
    rule(pattern).in_conditions(RuleConditions::Named(vec![condition.to_string()]))
}

fn c_like() -> LexSpec {
    let mut spec = LexSpec::new();
    let comment = spec.declare_condition("COMMENT", true);
    assert_eq!(comment, ConditionId::new(1));
    spec.add_rule(rule(r#""/*""#).named("comment_start"));
    spec.add_rule(rule("[a-z_][a-z0-9_]*").named("identifier"));
    spec.add_rule(rule("[0-9]+").named("number"));
    spec.add_rule(rule("[ \t\n]+").named("whitespace"));
    spec.add_rule(in_condition(r#""*/""#, "COMMENT").named("comment_end"));
    spec.add_rule(in_condition(r"[^*]+", "COMMENT").named("comment_text"));
    spec.add_rule(in_condition(r"\*", "COMMENT").named("comment_star"));
    spec.add_rule(Rule::end_of_file().named("eof"));
    spec.add_rule(Rule::end_of_file().in_conditions(RuleConditions::Named(vec!["COMMENT".into()])).named("eof_in_comment"));
    spec
}

fn tables_for(spec: &LexSpec, options: Options) -> Tables {
    let config = options.resolve().unwrap();
    let mut diagnostics = Diagnostics::new();
    let automaton = build(spec, &config, &mut diagnostics).unwrap();
    assert!(diagnostics.items().is_empty(), "{:?}", diagnostics.items());
    automaton.tables(&config.table)
}

fn names(spec: &LexSpec, tokens: Vec<(RuleId, String)>) -> Vec<(String, String)> {
    tokens
        .into_iter()
        .map(|(rule, text)| (spec.rules[rule.index()].name.clone().unwrap(), text))
        .collect()
}

#[test]
fn scans_with_start_conditions() {
    let spec = c_like();
    let tables = tables_for(&spec, Options::defaults(false));
    let mut scanner = TableScanner::new(&tables);

    let tokens = names(&spec, scanner.scan_str("x1 42 /*").unwrap());
    let expected = [("identifier", "x1"), ("whitespace", " "), ("number", "42"), ("whitespace", " "), ("comment_start", "/*")];
    assert_eq!(tokens, expected.map(|(a, b)| (a.to_string(), b.to_string())));

    scanner.set_condition(ConditionId::new(1));
    let tokens = names(&spec, scanner.scan_str("no * here*/").unwrap());
    let expected = [("comment_text", "no "), ("comment_star", "*"), ("comment_text", " here"), ("comment_end", "*/")];
    assert_eq!(tokens, expected.map(|(a, b)| (a.to_string(), b.to_string())));
}

#[test]
fn end_of_input_reports_eof_rule_per_condition() {
    let spec = c_like();
    let tables = tables_for(&spec, Options::defaults(false));
    let mut scanner = TableScanner::new(&tables);
    assert!(matches!(scanner.next_word(&[], 0), ScannerResult::EndOfInput(Some(rule)) if rule == RuleId::new(7)));
    scanner.set_condition(ConditionId::new(1));
    assert!(matches!(scanner.next_word(&[], 0), ScannerResult::EndOfInput(Some(rule)) if rule == RuleId::new(8)));
}

#[test]
fn exclusive_condition_hides_default_rules() {
    let spec = c_like();
    let tables = tables_for(&spec, Options::defaults(false));
    let mut scanner = TableScanner::new(&tables);
    assert!(scanner.scan_str("*").is_err());
    scanner.set_condition(ConditionId::new(1));
    let tokens = scanner.scan_str("abc").unwrap();
    assert_eq!(tokens, vec![(RuleId::new(5), "abc".to_string())]);
}

#[test]
fn trailing_context_is_rescanned() {
    let mut spec = LexSpec::new();
    spec.add_rule(rule("[a-z]+/\\(").named("call"));
    spec.add_rule(rule("[a-z]+").named("name"));
    spec.add_rule(rule("[()]").named("paren"));
    let tables = tables_for(&spec, Options::defaults(false));
    let tokens = names(&spec, TableScanner::new(&tables).scan_str("f(x)").unwrap());
    let expected = [("call", "f"), ("paren", "("), ("name", "x"), ("paren", ")")];
    assert_eq!(tokens, expected.map(|(a, b)| (a.to_string(), b.to_string())));
}

#[test]
fn lexemes_are_sliced_by_code_point() {
    let mut spec = LexSpec::new();
    spec.add_rule(rule("[α-ω]+").named("greek"));
    spec.add_rule(rule("[a-z]+").named("latin"));
    spec.add_rule(rule("[ ]+").named("space"));
    let tables = tables_for(&spec, Options::defaults(true));
    let text = "αβγ ab ωω".repeat(200);
    let tokens = names(&spec, TableScanner::new(&tables).scan_str(&text).unwrap());
    assert_eq!(tokens.len(), 4 * 200 + 1);
    let expected = [("greek", "αβγ"), ("space", " "), ("latin", "ab"), ("space", " "), ("greek", "ωωαβγ")];
    assert_eq!(&tokens[..5], expected.map(|(a, b)| (a.to_string(), b.to_string())));
    let rebuilt: String = tokens.iter().map(|(_, lexeme)| lexeme.as_str()).collect();
    assert_eq!(rebuilt, text);
}

#[test]
fn anchors_follow_line_boundaries() {
    let mut spec = LexSpec::new();
    spec.add_rule(rule("^#").named("directive"));
    spec.add_rule(rule("[a-z]+$").named("last_word"));
    spec.add_rule(rule("[a-z]+").named("word"));
    spec.add_rule(rule("[ #\n]").named("other"));
    let tables = tables_for(&spec, Options::defaults(false));
    let tokens = names(&spec, TableScanner::new(&tables).scan_str("#a b\n# c#").unwrap());
    let expected = [
        ("directive", "#"),
        ("word", "a"),
        ("other", " "),
        ("last_word", "b"),
        ("other", "\n"),
        ("directive", "#"),
        ("other", " "),
        ("word", "c"),
        ("other", "#"),
    ];
    assert_eq!(tokens, expected.map(|(a, b)| (a.to_string(), b.to_string())));
}

#[test]
fn errors_stop_the_pipeline() {
    let mut spec = LexSpec::new();
    spec.add_rule(rule("a+/b+").at(SourcePos::new(3, 1)));
    spec.add_rule(in_condition("c", "NOWHERE").at(SourcePos::new(4, 1)));
    let mut diagnostics = Diagnostics::new();
    let result = build(&spec, &Options::default().resolve().unwrap(), &mut diagnostics);
    assert!(matches!(result, Err(BuildError::Specification { stage: "subset construction" })));

    let kinds: Vec<DiagnosticKind> = diagnostics.errors().map(|d| d.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![DiagnosticKind::VariableTrailingContext, DiagnosticKind::UnknownStartCondition("NOWHERE".into())]
    );
    assert_eq!(diagnostics.items()[0].position, SourcePos::new(3, 1));
}

#[test]
fn shadowed_rule_stops_before_minimization() {
    let mut spec = LexSpec::new();
    spec.add_rule(rule("[a-z]+"));
    spec.add_rule(rule("while").named("keyword").at(SourcePos::new(2, 1)));
    let mut diagnostics = Diagnostics::new();
    let result = build(&spec, &Options::default().resolve().unwrap(), &mut diagnostics);
    assert!(matches!(result, Err(BuildError::Specification { stage: "minimization" })));
    let error = diagnostics.errors().next().unwrap();
    assert_eq!(error.kind, DiagnosticKind::UnreachableRule);
    assert_eq!(error.to_string(), "2:1: error: rule 1 (keyword) is never matched: earlier rules match everything it does");
}

#[test]
fn warnings_do_not_stop_the_pipeline() {
    let mut spec = LexSpec::new();
    spec.add_rule(rule("a*"));
    spec.add_rule(rule("b"));
    let mut diagnostics = Diagnostics::new();
    assert!(build(&spec, &Options::default().resolve().unwrap(), &mut diagnostics).is_ok());
    assert_eq!(diagnostics.items().len(), 1);
    assert_eq!(diagnostics.items()[0].severity, Severity::Warning);
    assert_eq!(diagnostics.items()[0].kind, DiagnosticKind::MatchesEmpty);
}

#[test]
fn unicode_requires_classes() {
    assert_eq!((Options::UNICODE | Options::MINIMIZE).resolve(), Err(ConfigError::UnicodeWithoutClasses));
}

#[test]
fn encodings_agree() {
    let spec = c_like();
    let config = Options::defaults(true).resolve().unwrap();
    let automaton = build(&spec, &config, &mut Diagnostics::new()).unwrap();
    let encode = |compression, compress_map| automaton.tables(&TableConfig { compression, compress_map });

    let dense = encode(Compression::Uncompressed, false);
    for (compression, compress_map) in [
        (Compression::RowCompressed, false),
        (Compression::Squeeze, false),
        (Compression::Squeeze, true),
    ] {
        let other = encode(compression, compress_map);
        for state in 0..dense.num_states {
            for class in 0..dense.num_classes {
                assert_eq!(dense.next_state(state, class), other.next_state(state, class));
            }
        }
        for c in (0..0x800).chain([0xFFFF, 0x10FFFF]) {
            assert_eq!(dense.class_of(c), other.class_of(c));
        }
    }
}

#[test]
fn binary_tables_round_trip() {
    let spec = c_like();
    for options in [Options::empty(), Options::defaults(false), Options::defaults(true) | Options::SQUEEZE] {
        let tables = tables_for(&spec, options);
        let bytes = tables.to_bytes();
        assert_eq!(&bytes[..8], b"LEXATBL1");
        assert_eq!(Tables::from_bytes(&bytes).unwrap(), tables);
        assert!(Tables::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}

#[test]
fn repeated_runs_are_byte_identical() {
    let spec = c_like();
    for options in [Options::defaults(false), Options::defaults(true), Options::SQUEEZE | Options::CHR_CLASSES] {
        let first = tables_for(&spec, options).to_bytes();
        let second = tables_for(&spec, options).to_bytes();
        assert_eq!(first, second);
    }
}

#[test]
fn minimization_shrinks_tables() {
    let spec = c_like();
    let plain = tables_for(&spec, Options::CHR_CLASSES);
    let minimized = tables_for(&spec, Options::CHR_CLASSES | Options::MINIMIZE);
    assert!(minimized.num_states <= plain.num_states);

    let text = "abc 12 /*";
    let plain_tokens = TableScanner::new(&plain).scan_str(text).unwrap();
    assert_eq!(plain_tokens, TableScanner::new(&minimized).scan_str(text).unwrap());
}

use std::collections::HashSet;
use std::fmt;

use codegen::{Block, Enum, Function, Impl, Scope, Struct};
use convert_case::{Case, Casing};

use crate::ast::LexSpec;
use crate::nfa::TrailingContext;
use crate::table::{ClassMap, Row, Tables, Transitions};

const PER_LINE: usize = 16;

// Rule names may repeat across start conditions or differ only in case;
// later rules get their id appended until the variant is unique.
fn variant_names(spec: &LexSpec) -> Vec<String> {
    let mut used = HashSet::new();
    let mut variants = Vec::with_capacity(spec.rules.len());
    for (rule, r) in spec.rules.iter().enumerate() {
        let mut base = match &r.name {
            Some(name) => name.to_case(Case::Pascal),
            None => format!("Rule{}", rule),
        };
        base.retain(|c| c.is_ascii_alphanumeric() || c == '_');
        if !base.starts_with(|c: char| c.is_ascii_alphabetic()) {
            base.insert_str(0, "Rule");
        }
        let mut variant = base.clone();
        let mut n = 0;
        while used.contains(&variant) {
            variant = if n == 0 { format!("{}{}", base, rule) } else { format!("{}{}V{}", base, rule, n) };
            n += 1;
        }
        used.insert(variant.clone());
        variants.push(variant);
    }
    variants
}

fn array(scope: &mut Scope, name: &str, ty: &str, values: &[String]) {
    let mut text = format!("pub static {}: [{}; {}] = [", name, ty, values.len());
    for chunk in values.chunks(PER_LINE) {
        text.push_str("\n    ");
        text.push_str(&chunk.join(", "));
        text.push(',');
    }
    if !values.is_empty() {
        text.push('\n');
    }
    text.push_str("];");
    scope.raw(&text);
}

fn numbers(values: &[u32]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn rows(scope: &mut Scope, rows: &[Row]) {
    let defaults: Vec<u32> = rows.iter().map(|r| r.default).collect();
    let mut offsets = vec![0u32];
    let mut classes = Vec::new();
    let mut targets = Vec::new();
    for row in rows {
        for (class, next) in &row.exceptions {
            classes.push(*class);
            targets.push(*next);
        }
        offsets.push(classes.len() as u32);
    }
    array(scope, "DEFAULT", "u32", &numbers(&defaults));
    array(scope, "EXCEPTION_OFFSET", "u32", &numbers(&offsets));
    array(scope, "EXCEPTION_CLASS", "u32", &numbers(&classes));
    array(scope, "EXCEPTION_NEXT", "u32", &numbers(&targets));
}

/// Renders `tables` as a self-contained Rust module.
///
/// The module exposes a rule enum named after `name` (Pascal case), the raw
/// arrays, and `class_of` / `next_state` lookups matching the chosen encoding.
pub fn emit<W: fmt::Write>(tables: &Tables, spec: &LexSpec, name: &str, out: &mut W) -> fmt::Result {
    let mut base = Scope::new();
    let enum_name = format!("{}Rule", name.to_case(Case::Pascal));

    let mut rule_enum = Enum::new(&enum_name);
    rule_enum.vis("pub");
    rule_enum.derive("Clone");
    rule_enum.derive("Copy");
    rule_enum.derive("PartialEq");
    rule_enum.derive("Eq");
    rule_enum.derive("Debug");
    // E0084: no repr on a zero-variant enum
    if !spec.rules.is_empty() {
        rule_enum.repr("u32");
    }

    let mut from_id = Function::new("from_id");
    from_id.vis("pub").arg("id", "u32").ret("Option<Self>");
    let mut from_id_match = Block::new("match id");

    let mut to_name = Function::new("to_name");
    to_name.vis("pub").arg_self().ret("&'static str");
    let mut to_name_match = Block::new("match self");

    for (rule, variant) in variant_names(spec).into_iter().enumerate() {
        rule_enum.new_variant(&variant);
        from_id_match.line(format!("{} => Some({}::{}),", rule, enum_name, variant));
        let display = spec.rules[rule].name.clone().unwrap_or_else(|| variant.clone());
        to_name_match.line(format!("{}::{} => \"{}\",", enum_name, variant, display.escape_default()));
    }
    from_id_match.line("_ => None,");
    if spec.rules.is_empty() {
        to_name_match.line("_ => unreachable!(),");
    }
    from_id.push_block(from_id_match);
    to_name.push_block(to_name_match);

    let mut rule_impl = Impl::new(&enum_name);
    rule_impl.push_fn(from_id);
    rule_impl.push_fn(to_name);
    base.push_enum(rule_enum);
    base.push_impl(rule_impl);

    let mut trailing = Enum::new("Trailing");
    trailing.vis("pub");
    trailing.derive("Clone");
    trailing.derive("Copy");
    trailing.derive("Debug");
    trailing.new_variant("None");
    trailing.new_variant("Head").tuple("u32");
    trailing.new_variant("Tail").tuple("u32");
    base.push_enum(trailing);

    let mut accept = Struct::new("Accept");
    accept.vis("pub");
    accept.derive("Clone");
    accept.derive("Copy");
    accept.derive("Debug");
    accept.field("pub rule", "u32");
    accept.field("pub trailing", "Trailing");
    base.push_struct(accept);

    base.raw("pub const DEAD: u32 = u32::MAX;");
    base.raw(&format!("pub const NUM_STATES: u32 = {};", tables.num_states));
    base.raw(&format!("pub const NUM_CLASSES: u32 = {};", tables.num_classes));
    let optional = |v: Option<u32>| v.map_or("None".to_string(), |v| format!("Some({})", v));
    base.raw(&format!("pub const BOL_CLASS: Option<u32> = {};", optional(tables.bol_class)));
    base.raw(&format!("pub const EOL_CLASS: Option<u32> = {};", optional(tables.eol_class)));

    array(&mut base, "START", "u32", &numbers(&tables.starts));
    let eof: Vec<String> = tables.eof_actions.iter().map(|r| optional(*r)).collect();
    array(&mut base, "EOF_ACTION", "Option<u32>", &eof);
    let accepts: Vec<String> = tables
        .accept
        .iter()
        .map(|entry| match entry {
            None => "None".to_string(),
            Some(entry) => {
                let trailing = match entry.trailing {
                    TrailingContext::None => "Trailing::None".to_string(),
                    TrailingContext::FixedHead(n) => format!("Trailing::Head({})", n),
                    TrailingContext::FixedTail(n) => format!("Trailing::Tail({})", n),
                };
                format!("Some(Accept {{ rule: {}, trailing: {} }})", entry.rule, trailing)
            }
        })
        .collect();
    array(&mut base, "ACCEPT", "Option<Accept>", &accepts);

    let mut class_of = Function::new("class_of");
    class_of.vis("pub").arg("c", "u32").ret("Option<u32>");
    match &tables.class_map {
        ClassMap::Dense(map) => {
            array(&mut base, "CLASS_MAP", "u32", &numbers(map));
            class_of.line("CLASS_MAP.get(c as usize).copied()");
        }
        ClassMap::Paged { index, pages } => {
            array(&mut base, "CLASS_INDEX", "u32", &numbers(index));
            array(&mut base, "CLASS_PAGES", "u32", &numbers(pages));
            class_of.line("let page = *CLASS_INDEX.get((c >> 8) as usize)? as usize;");
            class_of.line("Some(CLASS_PAGES[page * 256 + (c as usize & 0xFF)])");
        }
    }

    let mut next_state = Function::new("next_state");
    next_state.vis("pub").arg("state", "u32").arg("class", "u32").ret("u32");
    match &tables.transitions {
        Transitions::Dense(next) => {
            array(&mut base, "NEXT", "u32", &numbers(next));
            next_state.line("NEXT[(state * NUM_CLASSES + class) as usize]");
        }
        Transitions::RowCompressed(compressed) => {
            rows(&mut base, compressed);
            next_state.line("row_lookup(state, class)");
        }
        Transitions::Squeeze { meta, rows: compressed } => {
            array(&mut base, "META", "u32", &numbers(meta));
            rows(&mut base, compressed);
            next_state.line("row_lookup(state, META[class as usize])");
        }
    }

    if !matches!(tables.transitions, Transitions::Dense(_)) {
        let mut row_lookup = Function::new("row_lookup");
        row_lookup
            .arg("state", "u32")
            .arg("class", "u32")
            .ret("u32")
            .line("let (low, high) = (EXCEPTION_OFFSET[state as usize] as usize, EXCEPTION_OFFSET[state as usize + 1] as usize);")
            .line("match EXCEPTION_CLASS[low..high].binary_search(&class) {")
            .line("    Ok(i) => EXCEPTION_NEXT[low + i],")
            .line("    Err(_) => DEFAULT[state as usize],")
            .line("}");
        base.push_fn(row_lookup);
    }
    base.push_fn(class_of);
    base.push_fn(next_state);

    out.write_str(&base.to_string())?;
    out.write_char('\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Pattern, Rule, RuleConditions};
    use crate::diagnostics::Diagnostics;
    use crate::options::Options;
    use crate::table::DEAD;
    use std::collections::HashMap;

    fn calc() -> LexSpec {
        let mut spec = LexSpec::new();
        spec.add_rule(Rule::new(Pattern::parse("[a-z]+").unwrap()).named("identifier"));
        spec.add_rule(Rule::new(Pattern::parse("[0-9]+").unwrap()));
        spec
    }

    fn tables_and_source(spec: &LexSpec, options: Options) -> (Tables, String) {
        let config = options.resolve().unwrap();
        let automaton = crate::build(spec, &config, &mut Diagnostics::new()).unwrap();
        let tables = automaton.tables(&config.table);
        let mut out = String::new();
        emit(&tables, spec, "calc", &mut out).unwrap();
        (tables, out)
    }

    fn render(options: Options) -> String {
        tables_and_source(&calc(), options).1
    }

    // values of `pub static NAME: [u32; N] = [...]` in the emitted source
    fn static_array(source: &str, name: &str) -> Vec<u32> {
        let header = format!("pub static {}: [u32; ", name);
        let start = source.find(&header).unwrap_or_else(|| panic!("no array {}", name));
        let rest = &source[start..];
        let body = &rest[rest.find("= [").unwrap() + 3..rest.find("];").unwrap()];
        body.split(',').map(str::trim).filter(|v| !v.is_empty()).map(|v| v.parse().unwrap()).collect()
    }

    fn const_u32(source: &str, name: &str) -> u32 {
        let header = format!("pub const {}: u32 = ", name);
        let start = source.find(&header).unwrap() + header.len();
        let rest = &source[start..];
        rest[..rest.find(';').unwrap()].parse().unwrap()
    }

    // evaluates the emitted lookups the way the generated functions do
    struct Emitted {
        num_classes: u32,
        arrays: HashMap<&'static str, Vec<u32>>,
    }

    impl Emitted {
        fn parse(source: &str) -> Emitted {
            let names = [
                "CLASS_MAP",
                "CLASS_INDEX",
                "CLASS_PAGES",
                "NEXT",
                "META",
                "DEFAULT",
                "EXCEPTION_OFFSET",
                "EXCEPTION_CLASS",
                "EXCEPTION_NEXT",
            ];
            let arrays = names
                .into_iter()
                .filter(|name| source.contains(&format!("pub static {}:", name)))
                .map(|name| (name, static_array(source, name)))
                .collect();
            Emitted { num_classes: const_u32(source, "NUM_CLASSES"), arrays }
        }

        fn class_of(&self, c: u32) -> Option<u32> {
            if let Some(map) = self.arrays.get("CLASS_MAP") {
                return map.get(c as usize).copied();
            }
            let page = *self.arrays["CLASS_INDEX"].get((c >> 8) as usize)? as usize;
            Some(self.arrays["CLASS_PAGES"][page * 256 + (c as usize & 0xFF)])
        }

        fn row_lookup(&self, state: u32, class: u32) -> u32 {
            let offsets = &self.arrays["EXCEPTION_OFFSET"];
            let (low, high) = (offsets[state as usize] as usize, offsets[state as usize + 1] as usize);
            match self.arrays["EXCEPTION_CLASS"][low..high].binary_search(&class) {
                Ok(i) => self.arrays["EXCEPTION_NEXT"][low + i],
                Err(_) => self.arrays["DEFAULT"][state as usize],
            }
        }

        fn next_state(&self, state: u32, class: u32) -> u32 {
            if let Some(next) = self.arrays.get("NEXT") {
                next[(state * self.num_classes + class) as usize]
            } else if let Some(meta) = self.arrays.get("META") {
                self.row_lookup(state, meta[class as usize])
            } else {
                self.row_lookup(state, class)
            }
        }
    }

    #[test]
    fn emits_rule_enum() {
        let out = render(Options::default());
        assert!(out.contains("pub enum CalcRule"));
        assert!(out.contains("Identifier"));
        assert!(out.contains("Rule1"));
        assert!(out.contains("\"identifier\""));
        assert!(out.contains("#[repr(u32)]"));
    }

    #[test]
    fn emits_encoding_specific_lookups() {
        let dense = render(Options::MINIMIZE);
        assert!(dense.contains("pub static NEXT: [u32;"));
        assert!(dense.contains("pub static CLASS_MAP: [u32; 256]"));
        assert!(!dense.contains("fn row_lookup"));

        let rows = render(Options::default());
        assert!(rows.contains("pub static DEFAULT: [u32;"));
        assert!(rows.contains("fn row_lookup"));

        let squeezed = render(Options::SQUEEZE | Options::COMPRESS_MAP | Options::CHR_CLASSES);
        assert!(squeezed.contains("pub static META: [u32;"));
        assert!(squeezed.contains("pub static CLASS_PAGES: [u32; 256]"));
    }

    #[test]
    fn emitted_arrays_match_tables() {
        let mut spec = calc();
        spec.add_rule(Rule::new(Pattern::parse("^#").unwrap()));
        spec.add_rule(Rule::new(Pattern::parse("[ \n]").unwrap()));
        for options in [
            Options::MINIMIZE,
            Options::default(),
            Options::SQUEEZE | Options::CHR_CLASSES,
            Options::COMPRESS_MAP | Options::CHR_CLASSES,
            Options::defaults(true) | Options::SQUEEZE,
        ] {
            let (tables, source) = tables_and_source(&spec, options);
            let emitted = Emitted::parse(&source);
            assert_eq!(const_u32(&source, "NUM_STATES"), tables.num_states);
            for state in 0..tables.num_states {
                for class in 0..tables.num_classes {
                    let expected = tables.next_state(state, class).unwrap_or(DEAD);
                    assert_eq!(emitted.next_state(state, class), expected, "{:?} {} {}", options, state, class);
                }
            }
            for c in (0..0x300).chain([0xFFFF, 0x10FFFF, 0x110000]) {
                assert_eq!(emitted.class_of(c), tables.class_of(c), "{:?} {}", options, c);
            }
        }
    }

    #[test]
    fn colliding_rule_names_get_distinct_variants() {
        let mut spec = LexSpec::new();
        spec.declare_condition("COMMENT", true);
        spec.add_rule(Rule::new(Pattern::parse("a").unwrap()).named("close"));
        spec.add_rule(Rule::new(Pattern::parse("b").unwrap()).named("Close"));
        spec.add_rule(Rule::new(Pattern::parse("c").unwrap()).named("rule3"));
        spec.add_rule(Rule::new(Pattern::parse("d").unwrap()));
        spec.add_rule(
            Rule::new(Pattern::parse("a").unwrap())
                .named("close")
                .in_conditions(RuleConditions::Named(vec!["COMMENT".into()])),
        );
        let variants = variant_names(&spec);
        assert_eq!(variants, vec!["Close", "Close1", "Rule3", "Rule33", "Close4"]);

        let out = tables_and_source(&spec, Options::default()).1;
        assert!(out.contains("CalcRule::Close1 => \"Close\""));
        assert!(out.contains("4 => Some(CalcRule::Close4)"));
    }

    #[test]
    fn empty_rule_set_has_no_repr() {
        let out = tables_and_source(&LexSpec::new(), Options::default()).1;
        assert!(out.contains("pub enum CalcRule"));
        assert!(!out.contains("#[repr(u32)]"));
    }

    #[test]
    fn output_is_deterministic() {
        assert_eq!(render(Options::default()), render(Options::default()));
    }
}

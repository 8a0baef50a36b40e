use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lexa_re::alphabet::CodePoint;
use lexa_re::emit::emit;
use lexa_re::lexeme_def::parse_lexeme_def;
use lexa_re::{build, Automaton, Config, Diagnostics, LexSpec, Options, TableScanner};
use petgraph::dot::Dot;
use petgraph::graph::{Graph, NodeIndex};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "lexa")]
#[command(about = "Scanner table generator")]
struct Cli {
    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build tables from a rule definition file
    Build {
        rules: PathBuf,

        /// Output file (default: stdout, not allowed for `bytes`)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = Format::Rust)]
        format: Format,

        /// Prefix of the generated rule enum (default: file stem)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        options: OptionFlags,
    },
    /// Tokenize a file with the rules
    Scan {
        rules: PathBuf,
        input: PathBuf,

        /// Start condition to scan in
        #[arg(short, long, default_value = "INITIAL")]
        condition: String,

        #[command(flatten)]
        options: OptionFlags,
    },
    /// Write the DFA as Graphviz
    Dot {
        rules: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: OptionFlags,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Rust,
    Bytes,
    Json,
}

#[derive(Args)]
struct OptionFlags {
    /// Full Unicode alphabet instead of bytes
    #[arg(long)]
    unicode: bool,
    #[arg(long)]
    case_agnostic: bool,
    /// Partition the alphabet into equivalence classes (always on for Unicode)
    #[arg(long)]
    classes: bool,
    #[arg(long)]
    no_minimize: bool,
    /// Two-level class map
    #[arg(long)]
    compress_map: bool,
    /// Dense transition rows
    #[arg(long)]
    no_compress_next: bool,
    /// Merge identical columns into meta-classes
    #[arg(long)]
    squeeze: bool,
}

impl OptionFlags {
    fn options(&self) -> Options {
        let mut options = Options::defaults(self.unicode);
        options.set(Options::CASE_AGNOSTIC, self.case_agnostic);
        options.set(Options::CHR_CLASSES, self.unicode || self.classes);
        options.set(Options::MINIMIZE, !self.no_minimize);
        options.set(Options::COMPRESS_NEXT, !self.no_compress_next);
        options.set(Options::COMPRESS_MAP, self.unicode || self.compress_map);
        options.set(Options::SQUEEZE, self.squeeze);
        options
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();
}

fn load(rules: &Path, flags: &OptionFlags) -> Result<(LexSpec, Config, Automaton)> {
    let def_string = fs::read_to_string(rules).with_context(|| format!("failed to read {}", rules.display()))?;
    let spec = parse_lexeme_def(&def_string).with_context(|| format!("in {}", rules.display()))?;
    let config = flags.options().resolve()?;

    let now = Instant::now();
    let mut diagnostics = Diagnostics::new();
    let result = build(&spec, &config, &mut diagnostics);
    for diagnostic in diagnostics.items() {
        eprintln!("{}:{}", rules.display(), diagnostic);
    }
    let automaton = result?;
    info!(
        "built {} states over {} classes in {:.2?}",
        automaton.dfa.num_states(),
        automaton.dfa.num_classes(),
        now.elapsed()
    );
    Ok((spec, config, automaton))
}

fn write_output(output: Option<&Path>, contents: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {}, {} bytes", path.display(), contents.len());
        }
        None => print!("{}", String::from_utf8_lossy(contents)),
    }
    Ok(())
}

fn describe_class(automaton: &Automaton, class: u32) -> String {
    let partition = &automaton.partition;
    if Some(class) == partition.bol_class() {
        return "^".to_string();
    }
    if Some(class) == partition.eol_class() {
        return "$".to_string();
    }
    let show = |c: CodePoint| match char::from_u32(c) {
        Some(ch) if !ch.is_control() && ch != ' ' => ch.to_string(),
        _ => format!("\\x{:x}", c),
    };
    let mut text = String::new();
    for range in partition.class_set(class).ranges() {
        if range.low == range.high {
            text.push_str(&show(range.low));
        } else {
            let _ = write!(text, "{}-{}", show(range.low), show(range.high));
        }
    }
    text
}

fn dot(automaton: &Automaton, spec: &LexSpec) -> String {
    let dfa = &automaton.dfa;
    let mut graph: Graph<String, String> = Graph::new();
    let nodes: Vec<NodeIndex> = dfa
        .state_ids()
        .map(|s| {
            let label = match dfa.accept(s) {
                Some(tag) => format!("{} [{}]", s, spec.rules[tag.rule.index()].display_name(tag.rule)),
                None => s.to_string(),
            };
            graph.add_node(label)
        })
        .collect();

    for s in dfa.state_ids() {
        // one edge per target, labelled with every class leading there
        let mut targets: Vec<(usize, Vec<String>)> = Vec::new();
        for class in 0..dfa.num_classes() as u32 {
            if let Some(t) = dfa.next(s, class) {
                let label = describe_class(automaton, class);
                match targets.iter_mut().find(|(target, _)| *target == t.index()) {
                    Some((_, labels)) => labels.push(label),
                    None => targets.push((t.index(), vec![label])),
                }
            }
        }
        for (target, labels) in targets {
            graph.add_edge(nodes[s.index()], nodes[target], labels.join(" "));
        }
    }
    format!("{}", Dot::new(&graph))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build { rules, output, format, name, options } => {
            let (spec, config, automaton) = load(&rules, &options)?;
            let tables = automaton.tables(&config.table);
            let contents = match format {
                Format::Rust => {
                    let name = match name {
                        Some(name) => name,
                        None => rules.file_stem().map_or("lexer".to_string(), |s| s.to_string_lossy().into_owned()),
                    };
                    let mut source = String::new();
                    emit(&tables, &spec, &name, &mut source)?;
                    source.into_bytes()
                }
                Format::Bytes => {
                    if output.is_none() {
                        bail!("binary tables need an output file (-o)");
                    }
                    tables.to_bytes()
                }
                Format::Json => serde_json::to_vec_pretty(&tables)?,
            };
            write_output(output.as_deref(), &contents)
        }
        Commands::Scan { rules, input, condition, options } => {
            let (spec, config, automaton) = load(&rules, &options)?;
            let tables = automaton.tables(&config.table);
            let Some(condition_id) = spec.condition_id(&condition) else {
                bail!("unknown start condition `{}`", condition);
            };
            let text = fs::read_to_string(&input).with_context(|| format!("failed to read {}", input.display()))?;

            let mut scanner = TableScanner::new(&tables);
            scanner.set_condition(condition_id);
            let tokens = scanner.scan_str(&text).with_context(|| format!("while scanning {}", input.display()))?;
            for (rule, lexeme) in tokens {
                println!("{}\t{:?}", spec.rules[rule.index()].display_name(rule), lexeme);
            }
            Ok(())
        }
        Commands::Dot { rules, output, options } => {
            let (spec, _, automaton) = load(&rules, &options)?;
            write_output(output.as_deref(), dot(&automaton, &spec).as_bytes())
        }
    }
}

use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use phrasebender::config::Config;
use phrasebender::error::ParseError;
use phrasebender::grammar::Grammar;
use phrasebender::state_table::StateTable;
use phrasebender::utils::fmt_cost;
use phrasebender::{Engine, Err, ParseRequest, read_queries};

#[derive(Parser)]
#[command(name = "phrasebender-cli", version, about = "Compile query grammars and parse queries with them")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Compile a grammar into a state table
  Compile {
    grammar: PathBuf,
    /// Write the table as JSON here instead of printing a summary
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print every state
    #[arg(long)]
    states: bool,
  },
  /// Parse a query, or start a prompt if no query is given
  Parse(ParseArgs),
  /// Check that every query in a file reads back exactly as typed
  Check {
    #[command(flatten)]
    engine: EngineArgs,
    /// One query per line; blank lines and `//` comments are skipped
    queries: PathBuf,
  },
}

#[derive(Args)]
struct EngineArgs {
  /// Grammar text or a compiled `.json` table
  grammar: PathBuf,
  /// Engine config (TOML) for search limits and entities
  #[arg(long)]
  config: Option<PathBuf>,
  /// Entity list (JSON)
  #[arg(short, long)]
  entities: Option<PathBuf>,
}

#[derive(Args)]
struct ParseArgs {
  #[command(flatten)]
  engine: EngineArgs,
  /// Results to show
  #[arg(short)]
  k: Option<usize>,
  /// Print each result's cost
  #[arg(short, long)]
  costs: bool,
  /// Print each result's derivation tree
  #[arg(short, long)]
  trees: bool,
  /// Print the parse forest
  #[arg(short, long)]
  forest: bool,
  /// Print the parse forest as a graphviz graph
  #[arg(long)]
  forest_graph: bool,
  /// Print the state table before parsing
  #[arg(long)]
  states: bool,
  /// Print the other phrasings that mean the same as each result
  #[arg(short, long)]
  ambiguity: bool,
  /// Print each result's semantic as a JSON object
  #[arg(short, long)]
  object_semantics: bool,
  /// Parse the query this many more times and print the mean time
  #[arg(long, value_name = "RUNS")]
  benchmark: Option<u32>,
  query: Vec<String>,
}

fn compile(grammar: PathBuf, output: Option<PathBuf>, states: bool) -> Result<(), Err> {
  let g: Grammar = std::fs::read_to_string(&grammar)?.parse()?;
  let table = StateTable::compile(&g)?;

  if states {
    println!("{}", table);
  }
  match output {
    Some(path) => std::fs::write(&path, table.to_json()?)?,
    None => println!(
      "{} rules ({} compiled), {} symbols, {} states",
      g.rule_count(),
      table.rules.len(),
      table.symbols.len(),
      table.states.len()
    ),
  }
  Ok(())
}

fn engine(args: &EngineArgs) -> Result<Engine, Err> {
  let mut config = match &args.config {
    Some(path) => Config::load(path)?,
    None => Config::default(),
  };
  config.grammar = Some(args.grammar.clone());
  if args.entities.is_some() {
    config.entities = args.entities.clone();
  }
  Ok(Engine::from_config(&config)?)
}

fn parse(engine: &Engine, args: &ParseArgs, query: &str) -> Result<(), ParseError> {
  let mut request = ParseRequest::new(query);
  request.k = args.k;
  request.build_trees = args.trees;
  request.keep_forest = args.forest || args.forest_graph;
  request.report_ambiguity = args.ambiguity;

  let response = engine.parse_with(&request, None)?;

  if let Some(forest) = &response.forest {
    if args.forest {
      println!("forest:\n{}\n", forest.display(engine.table()));
    }
    if args.forest_graph {
      println!("{}", forest.to_dot(engine.table()));
    }
  }

  if response.results.is_empty() {
    println!("no legal interpretation");
  }
  for (idx, result) in response.results.iter().enumerate() {
    if args.costs {
      println!("{}. {} ({})", idx + 1, result.text, fmt_cost(result.cost));
    } else {
      println!("{}. {}", idx + 1, result.text);
    }
    println!("   {}", result.semantic_text);
    if args.object_semantics {
      println!("{:#}", result.semantic.to_object());
    }
    for other in result.ambiguous.iter() {
      println!("   same meaning: {} ({})", other.text, fmt_cost(other.cost));
    }
    if let Some(tree) = &result.tree {
      println!("{}\n", tree);
    }
  }

  if response.truncated {
    println!(
      "(search stopped after {} expansions, there may be more)",
      response.stats.expansions
    );
  }

  if let Some(runs) = args.benchmark.filter(|&r| r > 0) {
    let start = Instant::now();
    for _ in 0..runs {
      engine.parse_with(&request, None)?;
    }
    let elapsed = start.elapsed();
    println!("{} runs in {:?}, {:?} per parse", runs, elapsed, elapsed / runs);
  }
  Ok(())
}

fn check(engine: &Engine, queries: PathBuf) -> Result<(), Err> {
  let queries = read_queries(&std::fs::read_to_string(&queries)?);
  let mismatches = engine.round_trip(&queries);

  for m in mismatches.iter() {
    match &m.found {
      Some(found) => println!("{}\n  read back as: {}", m.query, found),
      None => println!("{}\n  no result", m.query),
    }
  }

  if mismatches.is_empty() {
    println!("all {} queries read back as typed", queries.len());
    Ok(())
  } else {
    Err(format!("{} of {} queries changed", mismatches.len(), queries.len()).into())
  }
}

fn repl(engine: &Engine, args: &ParseArgs) -> Result<(), Err> {
  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    input.clear();
    if io::stdin().read_line(&mut input)? == 0 {
      // ctrl+d
      return Ok(());
    }
    if input.trim().is_empty() {
      continue;
    }
    if let Err(e) = parse(engine, args, input.trim()) {
      println!("{}", e);
    }
  }
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(io::stderr)
    .init();

  match Cli::parse().command {
    Command::Compile {
      grammar,
      output,
      states,
    } => compile(grammar, output, states),
    Command::Check {
      engine: engine_args,
      queries,
    } => check(&engine(&engine_args)?, queries),
    Command::Parse(args) => {
      let engine = engine(&args.engine)?;
      if args.states {
        println!("{}", engine.table());
      }
      if args.query.is_empty() {
        return repl(&engine, &args);
      }
      Ok(parse(&engine, &args, &args.query.join(" "))?)
    }
  }
}

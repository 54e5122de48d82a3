use criterion::{Criterion, black_box, criterion_group, criterion_main};

use phrasebender::grammar::Grammar;
use phrasebender::state_table::StateTable;
use phrasebender::tokenizer::EntityIndex;
use phrasebender::{Engine, ParseRequest};

const GRAMMAR_SRC: &str = include_str!("../grammars/github.grm");
const ENTITIES_SRC: &str = include_str!("../grammars/entities.json");

fn criterion_benchmark(c: &mut Criterion) {
  let grammar = GRAMMAR_SRC.parse::<Grammar>().unwrap();
  let engine = Engine::compile(&grammar)
    .unwrap()
    .with_entities(EntityIndex::from_json(ENTITIES_SRC).unwrap());

  c.bench_function("compile github grammar", |b| {
    b.iter(|| StateTable::compile(black_box(&grammar)).unwrap())
  });

  c.bench_function("parse simple", |b| {
    b.iter(|| engine.parse(black_box("people I follow")).unwrap())
  });

  c.bench_function("parse with insertion", |b| {
    b.iter(|| engine.parse(black_box("repos by me")).unwrap())
  });

  let conjunction = ParseRequest::new("repos created by me and liked by Danny and forked by Aang").with_k(20);
  c.bench_function("parse conjunction k=20", |b| {
    b.iter(|| engine.parse_with(black_box(&conjunction), None).unwrap())
  });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

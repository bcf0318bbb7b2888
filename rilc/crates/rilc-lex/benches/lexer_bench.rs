use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rilc_lex::Lexer;
use rilc_util::Handler;

fn synthetic_program(lines: usize) -> String {
    let mut src = String::new();
    for i in 0..lines {
        src.push_str(&format!("v{} := {} + {} * 3\n", i, i, i % 7));
        src.push_str(&format!("println(v{})\n", i));
    }
    src
}

fn bench_lexer(c: &mut Criterion) {
    let small = synthetic_program(50);
    let large = synthetic_program(2000);

    c.bench_function("lex_small_program", |b| {
        b.iter(|| {
            let handler = Handler::new();
            black_box(Lexer::tokenize(black_box(&small), &handler))
        })
    });

    c.bench_function("lex_large_program", |b| {
        b.iter(|| {
            let handler = Handler::new();
            black_box(Lexer::tokenize(black_box(&large), &handler))
        })
    });
}

criterion_group!(benches, bench_lexer);
criterion_main!(benches);
